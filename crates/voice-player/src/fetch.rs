//! Fetches clip bytes from the backend, or from disk for plain file paths.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Raw clip bytes plus a container hint for the probe.
#[derive(Clone, Debug)]
pub struct FetchedClip {
    pub bytes: Vec<u8>,
    pub extension: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ClipFetcher {
    client: reqwest::Client,
}

impl ClipFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build audio http client")?;
        Ok(Self { client })
    }

    /// Load `locator`: `http(s)` URLs are downloaded, anything else is read from disk.
    pub async fn fetch(&self, locator: &str) -> Result<FetchedClip> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.fetch_remote(locator).await;
        }
        let bytes = tokio::fs::read(locator)
            .await
            .with_context(|| format!("read {locator}"))?;
        Ok(FetchedClip {
            bytes,
            extension: extension_hint(locator),
        })
    }

    async fn fetch_remote(&self, url: &str) -> Result<FetchedClip> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("audio fetch returned {status}"));
        }
        let from_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_content_type);
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("read body {url}"))?;
        Ok(FetchedClip {
            bytes: bytes.to_vec(),
            extension: extension_hint(url).or(from_type.map(str::to_string)),
        })
    }
}

/// File extension of a locator's path, ignoring any query or fragment.
pub fn extension_hint(locator: &str) -> Option<String> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = path.rsplit('/').next().unwrap_or(path);
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/aac" => "aac",
        _ => return None,
    };
    Some(ext)
}
