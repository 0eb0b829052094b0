//! Subcommand dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use clap::Subcommand;
use serde::Serialize;
use tokio::task::JoinHandle;
use voice_client::{PlaybackSequencer, RequestError, SequenceReport, VoiceApi};
use voice_player::LocalAudioPlayer;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show backend status.
    Status,
    /// List available roles.
    Roles,
    /// Switch the active role.
    SetRole { role_id: String },
    /// Send a chat message and play the spoken reply.
    Chat {
        text: String,
        #[arg(long)]
        role: Option<String>,
        /// Print the reply without playing its audio.
        #[arg(long)]
        no_play: bool,
    },
    /// Synthesize speech and play it.
    Speak {
        text: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        no_play: bool,
    },
    /// Start recognition, optionally uploading a recording.
    Recognize {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Stop recognition.
    RecognizeStop,
    /// Enable speech output.
    SpeakStart,
    /// Disable speech output.
    SpeakStop,
    /// Interrupt the current reply.
    Interrupt,
    /// Low-latency chat.
    DirectChat {
        text: String,
        #[arg(long)]
        stream: bool,
    },
    /// Low-latency recognition of a recording.
    DirectRecognize {
        #[arg(long)]
        file: PathBuf,
    },
    /// Play audio locators (URLs, server paths or local files) in order.
    Play {
        #[arg(required = true)]
        locators: Vec<String>,
    },
    /// List local output devices.
    Devices,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Roles => "roles",
            Command::SetRole { .. } => "set-role",
            Command::Chat { .. } => "chat",
            Command::Speak { .. } => "speak",
            Command::Recognize { .. } => "recognize",
            Command::RecognizeStop => "recognize-stop",
            Command::SpeakStart => "speak-start",
            Command::SpeakStop => "speak-stop",
            Command::Interrupt => "interrupt",
            Command::DirectChat { .. } => "direct-chat",
            Command::DirectRecognize { .. } => "direct-recognize",
            Command::Play { .. } => "play",
            Command::Devices => "devices",
        }
    }
}

pub async fn run(command: Command, api: &VoiceApi, device: Option<String>) -> Result<()> {
    match command {
        Command::Status => print_json(&api.get_status().await.map_err(classified)?),
        Command::Roles => print_json(&api.list_roles().await.map_err(classified)?),
        Command::SetRole { role_id } => {
            print_json(&api.set_role(&role_id).await.map_err(classified)?)
        }
        Command::Chat {
            text,
            role,
            no_play,
        } => {
            if no_play {
                let reply = api
                    .send_chat_message(&text, role.as_deref())
                    .await
                    .map_err(classified)?;
                return print_json(&reply);
            }
            let sequencer = sequencer(api, device)?;
            let played = api
                .send_chat_message_and_play(&text, role.as_deref(), &sequencer)
                .await
                .map_err(classified)?;
            print_json(&played.response)?;
            wait_for_playback(played.playback).await
        }
        Command::Speak {
            text,
            role,
            no_play,
        } => {
            if no_play {
                let speech = api
                    .synthesize_speech(&text, role.as_deref())
                    .await
                    .map_err(classified)?;
                return print_json(&speech);
            }
            let sequencer = sequencer(api, device)?;
            let played = api
                .synthesize_speech_and_play(&text, role.as_deref(), &sequencer)
                .await
                .map_err(classified)?;
            print_json(&played.response)?;
            wait_for_playback(played.playback).await
        }
        Command::Recognize { file } => {
            let audio = match file {
                Some(path) => encode_audio_file(&path)?,
                None => String::new(),
            };
            print_json(&api.recognize_voice(&audio).await.map_err(classified)?)
        }
        Command::RecognizeStop => {
            print_json(&api.stop_recognize_voice().await.map_err(classified)?)
        }
        Command::SpeakStart => print_json(&api.start_tts().await.map_err(classified)?),
        Command::SpeakStop => print_json(&api.stop_tts().await.map_err(classified)?),
        Command::Interrupt => print_json(&api.interrupt().await.map_err(classified)?),
        Command::DirectChat { text, stream } => {
            print_json(&api.direct_chat(&text, stream).await.map_err(classified)?)
        }
        Command::DirectRecognize { file } => {
            let audio = encode_audio_file(&file)?;
            print_json(&api.direct_recognize(&audio).await.map_err(classified)?)
        }
        Command::Play { locators } => {
            let urls: Vec<String> = locators
                .iter()
                .map(|l| {
                    if Path::new(l).exists() {
                        l.clone()
                    } else {
                        api.config().resolve_audio_url(l)
                    }
                })
                .collect();
            let report = sequencer(api, device)?.play_all(&urls).await;
            summarize(&report)
        }
        Command::Devices => {
            let devices = tokio::task::spawn_blocking(voice_player::list_output_devices)
                .await
                .context("device listing task failed")??;
            for (i, d) in devices.iter().enumerate() {
                let marker = if d.is_default { " (default)" } else { "" };
                println!(
                    "#{i}: {}{marker} [{}-{} Hz]",
                    d.name, d.min_rate, d.max_rate
                );
            }
            Ok(())
        }
    }
}

fn sequencer(
    api: &VoiceApi,
    device: Option<String>,
) -> Result<Arc<PlaybackSequencer<LocalAudioPlayer>>> {
    let player = LocalAudioPlayer::new(device, api.config().timeout)?;
    Ok(Arc::new(PlaybackSequencer::new(player)))
}

async fn wait_for_playback(handle: Option<JoinHandle<SequenceReport>>) -> Result<()> {
    let Some(handle) = handle else {
        tracing::info!("reply carried no audio");
        return Ok(());
    };
    let report = handle.await.context("playback task failed")?;
    summarize(&report)
}

/// Playback failures are reported but never fail the command.
fn summarize(report: &SequenceReport) -> Result<()> {
    for item in &report.items {
        if let Some(err) = item.error() {
            eprintln!("skipped {}: {err}", item.locator());
        }
    }
    tracing::info!(
        played = report.ended(),
        failed = report.errored(),
        "playback done"
    );
    Ok(())
}

/// Fold the classification into the message shown on exit.
fn classified(err: RequestError) -> anyhow::Error {
    match err.detail() {
        Some(detail) => anyhow!("{}: {} ({detail})", err.category(), err),
        None => anyhow!("{}: {}", err.category(), err),
    }
}

fn encode_audio_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read audio {:?}", path))?;
    if bytes.is_empty() {
        return Err(anyhow!("audio file {:?} is empty", path));
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("encode response")?;
    println!("{text}");
    Ok(())
}
