//! Failure classification for pipeline requests.
//!
//! Every failed call settles with a [`RequestError`] whose [`ErrorKind`] decides whether the
//! pipeline may retry it and which user-facing message it carries.

use std::fmt;

/// Coarse failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A response arrived with a status below 500 (normally 4xx).
    Client,
    /// A response arrived with status >= 500, or a 2xx body could not be decoded.
    Server,
    /// The request was sent but no response came back.
    Network,
    /// The request could not be built or sent at all.
    Configuration,
    /// The caller cancelled the call.
    Cancelled,
}

impl ErrorKind {
    /// Human-readable category label.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Client => "client error",
            ErrorKind::Server => "server error",
            ErrorKind::Network => "network error",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified request failure.
///
/// `Display` renders the user-facing message only; the category, status, target and any
/// server-provided detail are available through accessors for logging.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
    target: String,
    detail: Option<String>,
}

const MAX_DETAIL_CHARS: usize = 200;

impl RequestError {
    /// Classify a non-success HTTP response.
    pub fn from_status(target: impl Into<String>, status: u16, body: &[u8]) -> Self {
        let kind = if status >= 500 {
            ErrorKind::Server
        } else {
            ErrorKind::Client
        };
        Self {
            kind,
            status: Some(status),
            message: status_message(status),
            target: target.into(),
            detail: extract_detail(body),
        }
    }

    /// The request went out but nothing usable came back.
    pub fn network(target: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Network,
            status: None,
            message: "server unreachable".to_string(),
            target: target.into(),
            detail: Some(cause.to_string()),
        }
    }

    /// The request was never sent; `message` is surfaced verbatim.
    pub fn configuration(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            status: None,
            message: message.into(),
            target: target.into(),
            detail: None,
        }
    }

    /// The caller cancelled the call.
    pub fn cancelled(target: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            status: None,
            message: "request cancelled".to_string(),
            target: target.into(),
            detail: None,
        }
    }

    /// A success response whose body did not match the expected payload.
    pub fn invalid_payload(
        target: impl Into<String>,
        status: u16,
        cause: impl fmt::Display,
    ) -> Self {
        Self {
            kind: ErrorKind::Server,
            status: Some(status),
            message: "invalid response payload".to_string(),
            target: target.into(),
            detail: Some(cause.to_string()),
        }
    }

    /// Classify an error raised by the HTTP transport.
    pub fn from_transport(target: impl Into<String>, err: &reqwest::Error) -> Self {
        let target = target.into();
        if err.is_builder() {
            return Self::configuration(target, describe(err));
        }
        if let Some(status) = err.status() {
            return Self::from_status(target, status.as_u16(), &[]);
        }
        Self::network(target, describe(err))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Category label, e.g. `server error`.
    pub fn category(&self) -> &'static str {
        self.kind.label()
    }

    /// Message suitable for showing to a user.
    pub fn user_message(&self) -> &str {
        &self.message
    }

    /// Request target (path and query) the failure belongs to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Server-provided error detail or transport cause, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// `true` for failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            ErrorKind::Network => true,
            ErrorKind::Server => self.status.is_some_and(|s| s >= 500),
            _ => false,
        }
    }
}

/// User-facing message for an HTTP status.
pub fn status_message(status: u16) -> String {
    match status {
        400 => "invalid request parameters".to_string(),
        401 => "unauthorized".to_string(),
        403 => "access denied".to_string(),
        404 => "resource not found".to_string(),
        500 => "internal server error".to_string(),
        other => format!("request failed (status {other})"),
    }
}

/// Pull the `detail` field out of an error body, falling back to the raw text.
fn extract_detail(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail") {
            return Some(match detail.as_str() {
                Some(s) => s.to_string(),
                None => detail.to_string(),
            });
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_DETAIL_CHARS).collect())
}

/// Render an error with its source chain, `outer: inner: root`.
fn describe(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_map_to_messages() {
        assert_eq!(status_message(400), "invalid request parameters");
        assert_eq!(status_message(401), "unauthorized");
        assert_eq!(status_message(403), "access denied");
        assert_eq!(status_message(404), "resource not found");
        assert_eq!(status_message(500), "internal server error");
        assert_eq!(status_message(502), "request failed (status 502)");
        assert_eq!(status_message(418), "request failed (status 418)");
    }

    #[test]
    fn status_range_decides_kind() {
        let err = RequestError::from_status("/roles", 404, b"");
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_transient());

        let err = RequestError::from_status("/roles", 503, b"");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.category(), "server error");
        assert!(err.is_transient());

        let err = RequestError::from_status("/roles", 304, b"");
        assert_eq!(err.kind(), ErrorKind::Client);
    }

    #[test]
    fn fastapi_detail_is_extracted() {
        let err = RequestError::from_status("/role/set", 404, br#"{"detail":"role not found"}"#);
        assert_eq!(err.detail(), Some("role not found"));
        assert_eq!(err.to_string(), "resource not found");
    }

    #[test]
    fn plain_text_detail_is_truncated() {
        let body = "x".repeat(500);
        let err = RequestError::from_status("/chat", 500, body.as_bytes());
        assert_eq!(err.detail().map(str::len), Some(MAX_DETAIL_CHARS));
    }

    #[test]
    fn network_errors_are_transient_without_status() {
        let err = RequestError::network("/status", "connection refused");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), None);
        assert_eq!(err.user_message(), "server unreachable");
        assert_eq!(err.detail(), Some("connection refused"));
        assert!(err.is_transient());
    }

    #[test]
    fn configuration_message_is_verbatim() {
        let err = RequestError::configuration("/status", "relative URL without a base");
        assert_eq!(err.to_string(), "relative URL without a base");
        assert_eq!(err.category(), "configuration error");
        assert!(!err.is_transient());
    }

    #[test]
    fn invalid_payload_is_not_transient() {
        let err = RequestError::invalid_payload("/roles", 200, "expected value");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status(), Some(200));
        assert!(!err.is_transient());
    }

    #[test]
    fn cancelled_is_flagged() {
        let err = RequestError::cancelled("/chat");
        assert!(err.is_cancelled());
        assert!(!err.is_transient());
        assert_eq!(err.target(), "/chat");
    }
}
