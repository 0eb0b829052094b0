//! `voice-cli`: talk to the voice assistant backend from a terminal.
//!
//! Every backend call goes through the retrying request pipeline; replies that carry audio
//! are played on a local output device unless `--no-play` is given. Ctrl-C cancels the
//! command in flight.

mod commands;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use voice_client::VoiceApi;

use crate::commands::Command;
use crate::config::{CliConfig, Overrides};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "voice-cli", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend API root, e.g. http://192.168.1.10:51001/api
    #[arg(long)]
    server: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries after the first attempt.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Output device name (substring match).
    #[arg(long)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,voice_client=info,voice_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let file_cfg = match args.config.as_deref() {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let overrides = Overrides {
        server: args.server,
        timeout_ms: args.timeout_ms,
        max_retries: args.max_retries,
        device: args.device,
    };
    let client_cfg = file_cfg.client_config(&overrides);
    let device = file_cfg.device(&overrides);
    tracing::debug!(
        base_url = %client_cfg.base_url,
        timeout_ms = client_cfg.timeout.as_millis() as u64,
        max_retries = client_cfg.max_retries,
        "client configured"
    );

    let cancel = CancellationToken::new();
    let ctrlc_token = cancel.clone();
    let _ = ctrlc::set_handler(move || {
        ctrlc_token.cancel();
    });

    let api = VoiceApi::new(client_cfg)
        .map_err(|e| anyhow!("{}: {}", e.category(), e))?
        .with_cancel(cancel.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let name = args.command.name();
    let result = runtime.block_on(async move {
        tokio::select! {
            biased;
            // Requests settle as classified `cancelled` errors on their own.
            result = commands::run(args.command, &api, device) => result,
            _ = cancel.cancelled() => {
                tracing::warn!(command = name, "cancelled");
                Err(anyhow!("{name} cancelled"))
            }
        }
    });
    // A clip still playing on a blocking thread must not hold the process open.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
