//! Sequential playback of returned audio clips.
//!
//! Items play strictly one after another. A failing item is logged and recorded in the
//! [`SequenceReport`]; it never stops the rest of the queue.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Backend that can fetch and play one audio clip.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Loaded, ready-to-play clip.
    type Clip: Send;

    /// Acquire a playable clip for `locator`.
    async fn load(&self, locator: &str) -> anyhow::Result<Self::Clip>;

    /// Play `clip` to completion.
    async fn play(&self, clip: Self::Clip) -> anyhow::Result<()>;
}

/// Lifecycle of one queue item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Ended,
    Errored,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Ended | PlaybackState::Errored)
    }

    /// Allowed edges: `idle -> loading -> playing -> {ended, errored}` plus `loading -> errored`.
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Playing)
                | (Loading, Errored)
                | (Playing, Ended)
                | (Playing, Errored)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Ended => "ended",
            PlaybackState::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Failure of a single item.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to load {locator}: {message}")]
    Load { locator: String, message: String },
    #[error("playback of {locator} failed: {message}")]
    Playback { locator: String, message: String },
}

impl PlaybackError {
    pub fn locator(&self) -> &str {
        match self {
            PlaybackError::Load { locator, .. } | PlaybackError::Playback { locator, .. } => {
                locator
            }
        }
    }
}

/// One queue entry and where it ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackItem {
    locator: String,
    state: PlaybackState,
    error: Option<PlaybackError>,
}

impl PlaybackItem {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            state: PlaybackState::Idle,
            error: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    /// Move to `next` if the edge is allowed. Returns whether the state changed.
    fn advance(&mut self, next: PlaybackState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                locator = %self.locator,
                from = %self.state,
                to = %next,
                "ignoring invalid playback transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    fn fail(&mut self, err: PlaybackError) -> PlaybackError {
        self.advance(PlaybackState::Errored);
        self.error = Some(err.clone());
        err
    }
}

/// Outcome of a whole queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub items: Vec<PlaybackItem>,
}

impl SequenceReport {
    pub fn ended(&self) -> usize {
        self.count(PlaybackState::Ended)
    }

    pub fn errored(&self) -> usize {
        self.count(PlaybackState::Errored)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn count(&self, state: PlaybackState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }
}

/// Plays queues of audio locators through an [`AudioPlayer`].
pub struct PlaybackSequencer<P> {
    player: P,
}

impl<P: AudioPlayer> PlaybackSequencer<P> {
    pub fn new(player: P) -> Self {
        Self { player }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    /// Play one locator, resolving when it ends or fails.
    pub async fn play_one(&self, locator: &str) -> Result<(), PlaybackError> {
        let mut item = PlaybackItem::new(locator);
        self.play_item(&mut item).await
    }

    /// Play every locator in order. Never fails; per-item outcomes are in the report.
    pub async fn play_all<S: AsRef<str>>(&self, locators: &[S]) -> SequenceReport {
        let mut report = SequenceReport {
            items: Vec::with_capacity(locators.len()),
        };
        for (index, locator) in locators.iter().enumerate() {
            let mut item = PlaybackItem::new(locator.as_ref());
            if let Err(err) = self.play_item(&mut item).await {
                tracing::warn!(index, locator = %item.locator, "skipping clip: {err}");
            }
            report.items.push(item);
        }
        if !report.is_empty() {
            tracing::info!(
                total = report.items.len(),
                ended = report.ended(),
                errored = report.errored(),
                "playback queue finished"
            );
        }
        report
    }

    async fn play_item(&self, item: &mut PlaybackItem) -> Result<(), PlaybackError> {
        item.advance(PlaybackState::Loading);
        let clip = match self.player.load(&item.locator).await {
            Ok(clip) => clip,
            Err(e) => {
                return Err(item.fail(PlaybackError::Load {
                    locator: item.locator.clone(),
                    message: format!("{e:#}"),
                }));
            }
        };

        item.advance(PlaybackState::Playing);
        tracing::debug!(locator = %item.locator, "playing clip");
        if let Err(e) = self.player.play(clip).await {
            return Err(item.fail(PlaybackError::Playback {
                locator: item.locator.clone(),
                message: format!("{e:#}"),
            }));
        }
        item.advance(PlaybackState::Ended);
        Ok(())
    }
}

/// Run a queue on a background task and hand back its join handle.
pub fn spawn_sequence<P>(
    sequencer: Arc<PlaybackSequencer<P>>,
    locators: Vec<String>,
) -> JoinHandle<SequenceReport>
where
    P: AudioPlayer + 'static,
{
    tokio::spawn(async move { sequencer.play_all(&locators).await })
}
