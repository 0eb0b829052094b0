//! Configuration loading and parsing.
//!
//! Values resolve in order: command-line flag, config file, built-in default.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use voice_client::{ClientConfig, RetryPolicy};

/// Top-level CLI configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    /// Backend connection settings.
    pub client: Option<ClientSection>,
    /// Local playback settings.
    pub player: Option<PlayerSection>,
}

/// `[client]` table.
#[derive(Debug, Default, Deserialize)]
pub struct ClientSection {
    /// API root, e.g. `http://localhost:51001/api`.
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    /// `transient` or `always`.
    pub retry_policy: Option<RetryPolicy>,
}

/// `[player]` table.
#[derive(Debug, Default, Deserialize)]
pub struct PlayerSection {
    /// Output device name substring.
    pub device: Option<String>,
}

/// Flag values that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub device: Option<String>,
}

impl CliConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<CliConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Build the pipeline configuration.
    pub fn client_config(&self, overrides: &Overrides) -> ClientConfig {
        let section = self.client.as_ref();
        let mut cfg = ClientConfig::default();

        if let Some(url) = overrides
            .server
            .clone()
            .or_else(|| section.and_then(|s| s.base_url.clone()))
        {
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = overrides
            .timeout_ms
            .or_else(|| section.and_then(|s| s.timeout_ms))
        {
            cfg.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = overrides
            .max_retries
            .or_else(|| section.and_then(|s| s.max_retries))
        {
            cfg.max_retries = n;
        }
        if let Some(ms) = section.and_then(|s| s.retry_base_delay_ms) {
            cfg.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(policy) = section.and_then(|s| s.retry_policy) {
            cfg.retry_policy = policy;
        }
        cfg
    }

    /// Output device to play on, if one was named.
    pub fn device(&self, overrides: &Overrides) -> Option<String> {
        overrides.device.clone().or_else(|| {
            self.player
                .as_ref()
                .and_then(|p| p.device.as_deref())
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
        })
    }
}
