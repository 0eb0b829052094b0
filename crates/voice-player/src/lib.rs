//! Local audio output for assistant replies.
//!
//! [`LocalAudioPlayer`] plugs into [`voice_client::PlaybackSequencer`]: `load` downloads and
//! decodes a clip, `play` sends it to a CPAL output device.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use voice_client::AudioPlayer;

pub mod decode;
pub mod device;
pub mod fetch;
pub mod playback;
pub mod resample;

pub use decode::DecodedClip;
pub use device::{DeviceInfo, list_device_infos};

/// Output devices of the default audio host.
pub fn list_output_devices() -> anyhow::Result<Vec<DeviceInfo>> {
    list_device_infos(&cpal::default_host())
}

/// Plays clips on a local output device.
#[derive(Clone, Debug)]
pub struct LocalAudioPlayer {
    fetcher: fetch::ClipFetcher,
    device: Option<String>,
}

impl LocalAudioPlayer {
    /// `device` is a case-insensitive substring of the output device name; `fetch_timeout`
    /// bounds each clip download.
    pub fn new(device: Option<String>, fetch_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher: fetch::ClipFetcher::new(fetch_timeout)?,
            device,
        })
    }
}

#[async_trait]
impl AudioPlayer for LocalAudioPlayer {
    type Clip = DecodedClip;

    async fn load(&self, locator: &str) -> anyhow::Result<DecodedClip> {
        let fetched = self.fetcher.fetch(locator).await?;
        let clip = tokio::task::spawn_blocking(move || {
            decode::decode_clip(fetched.bytes, fetched.extension.as_deref())
        })
        .await
        .context("decode task failed")?
        .with_context(|| format!("decode {locator}"))?;
        tracing::info!(
            locator,
            duration_ms = clip.duration().as_millis() as u64,
            "clip loaded"
        );
        Ok(clip)
    }

    async fn play(&self, clip: DecodedClip) -> anyhow::Result<()> {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || playback::play_clip(&clip, device.as_deref()))
            .await
            .context("playback task failed")?
    }
}
