//! Client configuration.
//!
//! Built once by the caller and handed to [`crate::pipeline::RequestPipeline::new`]; the
//! pipeline never mutates it afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backend API root used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:51001/api";
/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Unit of the linear backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Which failures the pipeline is allowed to retry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry only network failures and server errors (status >= 500).
    #[default]
    Transient,
    /// Retry every failure except cancellation, up to the retry cap.
    Always,
}

/// Immutable settings shared by every call made through one pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:51001/api`.
    pub base_url: String,
    /// Timeout applied to each dispatch attempt.
    pub timeout: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit: retry `n` waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Retry eligibility rule.
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults with a custom API root.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Server origin that audio paths are relative to (the API root without `/api`).
    pub fn audio_origin(&self) -> &str {
        let trimmed = self.base_url.trim_end_matches('/');
        trimmed.strip_suffix("/api").unwrap_or(trimmed)
    }

    /// Turn an audio locator returned by the backend into a fetchable URL.
    ///
    /// Absolute `http(s)` URLs pass through; anything else is joined onto
    /// [`Self::audio_origin`].
    pub fn resolve_audio_url(&self, locator: &str) -> String {
        let locator = locator.trim();
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return locator.to_string();
        }
        let origin = self.audio_origin();
        if locator.starts_with('/') {
            format!("{origin}{locator}")
        } else {
            format!("{origin}/{locator}")
        }
    }
}
