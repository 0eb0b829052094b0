//! Request pipeline: cache-busting, retry with linear backoff, error classification.
//!
//! Every call goes through [`RequestPipeline::execute`]:
//! 1. a fresh `_t=<millis>` marker is appended to the target for each dispatch attempt
//! 2. failures are classified into a [`RequestError`]
//! 3. eligible failures are retried after `retry * base_delay`
//! 4. the JSON body of the first successful attempt is decoded and returned
//!
//! Retry state (counter, last marker) lives in the call's own [`CallState`] and is dropped
//! with it; the pipeline itself only holds immutable configuration and the HTTP client.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::RequestError;

/// Query parameter carrying the cache-busting marker.
pub const CACHE_BUST_PARAM: &str = "_t";

/// One outbound call: method, target, optional JSON body and headers.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, RequestError> {
        let value = serde_json::to_value(body)
            .map_err(|e| RequestError::configuration(self.path.clone(), e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Add a header on top of the JSON defaults. Invalid names or values surface as a
    /// configuration error at dispatch time.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the pipeline timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// Identity of one dispatch attempt within a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// 1 for the first dispatch, 2 for the first retry, ...
    pub number: u32,
    /// Cache-busting marker sent with this attempt.
    pub marker: u64,
}

/// Per-call mutable state. Never shared between calls.
#[derive(Debug, Default)]
struct CallState {
    retries: u32,
    last_marker: u64,
}

impl CallState {
    fn next_attempt(&mut self) -> Attempt {
        let marker = fresh_marker(self.last_marker);
        self.last_marker = marker;
        Attempt {
            number: self.retries + 1,
            marker,
        }
    }
}

/// Millisecond timestamp, bumped past `previous` so markers strictly increase within a call.
fn fresh_marker(previous: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    now.max(previous.saturating_add(1))
}

/// Append the cache-busting marker to a path, respecting an existing query string.
pub fn with_cache_buster(target: &str, marker: u64) -> String {
    let sep = if target.contains('?') { '&' } else { '?' };
    format!("{target}{sep}{CACHE_BUST_PARAM}={marker}")
}

/// Retry eligibility and backoff derived from [`ClientConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    pub policy: RetryPolicy,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetrySchedule {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            policy: config.retry_policy,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// Whether a call that has already retried `retries` times may retry `err`.
    pub fn allows(&self, err: &RequestError, retries: u32) -> bool {
        if retries >= self.max_retries || err.is_cancelled() {
            return false;
        }
        match self.policy {
            RetryPolicy::Transient => err.is_transient(),
            RetryPolicy::Always => true,
        }
    }

    /// Delay before retry number `retry` (1-based): `retry * base_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

/// Drive `attempt_fn` until it succeeds, fails with a non-retryable error, exhausts the
/// schedule, or `cancel` fires.
pub async fn run_with_retry<T, F, Fut>(
    schedule: RetrySchedule,
    target: &str,
    cancel: Option<&CancellationToken>,
    mut attempt_fn: F,
) -> Result<T, RequestError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut state = CallState::default();
    loop {
        let attempt = state.next_attempt();
        tracing::debug!(
            path = %target,
            attempt = attempt.number,
            marker = attempt.marker,
            "dispatching request"
        );

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(RequestError::cancelled(target)),
                    result = attempt_fn(attempt) => result,
                }
            }
            None => attempt_fn(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                if state.retries > 0 {
                    tracing::info!(
                        path = %target,
                        attempt = attempt.number,
                        "request recovered after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !schedule.allows(&err, state.retries) {
            log_failure(&err, attempt.number);
            return Err(err);
        }

        state.retries += 1;
        let delay = schedule.delay_for(state.retries);
        tracing::warn!(
            path = %target,
            retry = state.retries,
            max_retries = schedule.max_retries,
            delay_ms = delay.as_millis() as u64,
            kind = %err.kind(),
            status = ?err.status(),
            "request failed; retrying"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        let err = RequestError::cancelled(target);
                        log_failure(&err, attempt.number);
                        return Err(err);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

fn log_failure(err: &RequestError, attempts: u32) {
    if err.is_cancelled() {
        tracing::info!(path = %err.target(), attempts, "request cancelled");
        return;
    }
    tracing::error!(
        path = %err.target(),
        attempts,
        kind = %err.kind(),
        status = ?err.status(),
        detail = ?err.detail(),
        "request failed: {err}"
    );
}

/// Shared HTTP client wrapped with the cache-bust / retry / classify interceptors.
///
/// Cheap to clone; clones share the connection pool and configuration.
#[derive(Clone, Debug)]
pub struct RequestPipeline {
    config: Arc<ClientConfig>,
    client: Client,
}

impl RequestPipeline {
    pub fn new(config: ClientConfig) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RequestError::from_transport(config.base_url.clone(), &e))?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` and decode the success payload.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
    ) -> Result<T, RequestError> {
        self.execute(request, None).await
    }

    /// Like [`Self::send`], settling as cancelled as soon as `cancel` fires.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, RequestError> {
        let schedule = RetrySchedule::from_config(&self.config);
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let (status, body) = run_with_retry(schedule, &request.path, cancel, move |attempt| {
            counter.store(attempt.number, Ordering::Relaxed);
            self.dispatch(request, attempt)
        })
        .await?;
        decode_payload(&request.path, status, &body)
            .inspect_err(|err| log_failure(err, attempts.load(Ordering::Relaxed)))
    }

    /// One HTTP round trip. Non-2xx statuses come back as classified errors.
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        attempt: Attempt,
    ) -> Result<(u16, Vec<u8>), RequestError> {
        let path = request.path.as_str();
        let url = self.resolve(&with_cache_buster(path, attempt.marker), path)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RequestError::configuration(path, e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RequestError::configuration(path, e.to_string()))?;
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| RequestError::from_transport(path, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            return Err(RequestError::from_status(path, status.as_u16(), &body));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| RequestError::from_transport(path, &e))?;
        Ok((status.as_u16(), body.to_vec()))
    }

    fn resolve(&self, target: &str, path: &str) -> Result<Url, RequestError> {
        let base = self.config.base_url.trim_end_matches('/');
        let full = if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        };
        Url::parse(&full).map_err(|e| RequestError::configuration(path, e.to_string()))
    }
}

/// Decode a success body; blank bodies decode as JSON `null`.
fn decode_payload<T: DeserializeOwned>(
    target: &str,
    status: u16,
    body: &[u8],
) -> Result<T, RequestError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| RequestError::invalid_payload(target, status, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config(base_url: String) -> ClientConfig {
        ClientConfig::new(base_url)
            .with_timeout(Duration::from_secs(2))
            .with_retry_base_delay(Duration::from_millis(5))
    }

    async fn pipeline_for(server: &MockServer) -> RequestPipeline {
        RequestPipeline::new(fast_config(format!("{}/api", server.uri()))).unwrap()
    }

    fn markers(requests: &[wiremock::Request]) -> Vec<String> {
        requests
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == CACHE_BUST_PARAM)
                    .map(|(_, v)| v.to_string())
            })
            .collect()
    }

    fn transient() -> RetrySchedule {
        RetrySchedule {
            policy: RetryPolicy::Transient,
            max_retries: 2,
            base_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn cache_buster_appends_with_question_mark_or_ampersand() {
        assert_eq!(with_cache_buster("/status", 42), "/status?_t=42");
        assert_eq!(with_cache_buster("/roles?lang=en", 42), "/roles?lang=en&_t=42");
    }

    #[test]
    fn markers_strictly_increase_within_a_call() {
        let mut state = CallState::default();
        let first = state.next_attempt();
        let second = state.next_attempt();
        let third = state.next_attempt();
        assert!(first.marker < second.marker);
        assert!(second.marker < third.marker);
    }

    #[test]
    fn schedule_refuses_client_errors_and_cancellation() {
        let schedule = transient();
        assert!(!schedule.allows(&RequestError::from_status("/x", 404, b""), 0));
        assert!(!schedule.allows(&RequestError::cancelled("/x"), 0));
        assert!(!schedule.allows(&RequestError::configuration("/x", "bad"), 0));
        assert!(schedule.allows(&RequestError::from_status("/x", 502, b""), 0));
        assert!(schedule.allows(&RequestError::network("/x", "down"), 1));
        assert!(!schedule.allows(&RequestError::network("/x", "down"), 2));
    }

    #[test]
    fn always_policy_retries_client_errors_but_not_cancellation() {
        let schedule = RetrySchedule {
            policy: RetryPolicy::Always,
            ..transient()
        };
        assert!(schedule.allows(&RequestError::from_status("/x", 400, b""), 0));
        assert!(!schedule.allows(&RequestError::from_status("/x", 400, b""), 2));
        assert!(!schedule.allows(&RequestError::cancelled("/x"), 0));
    }

    #[test]
    fn delay_is_linear() {
        let schedule = transient();
        assert_eq!(schedule.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(schedule.delay_for(3), Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_retry_times_base_delay() {
        let start = Instant::now();
        let stamps = Mutex::new(Vec::new());
        let result: Result<(), RequestError> = run_with_retry(transient(), "/chat", None, |_| {
            stamps.lock().unwrap().push(start.elapsed());
            std::future::ready(Err(RequestError::network("/chat", "down")))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(
            *stamps.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_millis(1_000),
                Duration::from_millis(3_000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_loop_recovers_on_third_attempt() {
        let seen = Mutex::new(Vec::new());
        let result = run_with_retry(transient(), "/status", None, |attempt| {
            seen.lock().unwrap().push(attempt);
            let outcome = if attempt.number < 3 {
                Err(RequestError::network("/status", "connection reset"))
            } else {
                Ok("ok")
            };
            std::future::ready(outcome)
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter().map(|a| a.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(seen[0].marker < seen[1].marker && seen[1].marker < seen[2].marker);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_dispatches_once() {
        let calls = Mutex::new(0u32);
        let schedule = RetrySchedule {
            max_retries: 0,
            ..transient()
        };
        let result: Result<(), RequestError> = run_with_retry(schedule, "/x", None, |_| {
            *calls.lock().unwrap() += 1;
            std::future::ready(Err(RequestError::from_status("/x", 500, b"")))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let token = CancellationToken::new();
        let calls = Mutex::new(0u32);
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });
        let result: Result<(), RequestError> =
            run_with_retry(transient(), "/chat", Some(&token), |_| {
                *calls.lock().unwrap() += 1;
                std::future::ready(Err(RequestError::from_status("/chat", 503, b"")))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn success_unwraps_payload_and_tags_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .and(header("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "running", "version": "1.0.0"})),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let value: Value = pipeline
            .send(&RequestDescriptor::get("/status"))
            .await
            .unwrap();
        assert_eq!(value["status"], "running");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(markers(&requests).len(), 1);
    }

    #[tokio::test]
    async fn existing_query_keeps_its_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/roles"))
            .and(query_param("lang", "en"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"roles": []})),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let value: Value = pipeline
            .send(&RequestDescriptor::get("/roles?lang=en"))
            .await
            .unwrap();
        assert_eq!(value["roles"], serde_json::json!([]));
        let requests = server.received_requests().await.unwrap();
        assert_eq!(markers(&requests).len(), 1);
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/role/set"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "no such role"})),
            )
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let request = RequestDescriptor::post("/role/set")
            .json(&serde_json::json!({"role_id": "ghost"}))
            .unwrap();
        let err = pipeline.send::<Value>(&request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.user_message(), "resource not found");
        assert_eq!(err.detail(), Some("no such role"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let request = RequestDescriptor::post("/chat")
            .json(&serde_json::json!({"text": "hi"}))
            .unwrap();
        let err = pipeline.send::<Value>(&request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.category(), "server error");
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.user_message(), "internal server error");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let mut seen = markers(&requests);
        assert_eq!(seen.len(), 3);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3, "every attempt carries a distinct marker");
    }

    #[tokio::test]
    async fn network_failures_then_success_resolves_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let config = fast_config(format!("{}/api", server.uri()))
            .with_timeout(Duration::from_millis(200));
        let pipeline = RequestPipeline::new(config).unwrap();
        let value: Value = pipeline
            .send(&RequestDescriptor::get("/status"))
            .await
            .unwrap();

        assert_eq!(value["status"], "running");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn transient_errors_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/voice/speak"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/voice/speak"))
            .and(body_json(serde_json::json!({"text": "hello"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"audio_paths": ["/static/1.mp3"]})),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let request = RequestDescriptor::post("/voice/speak")
            .json(&serde_json::json!({"text": "hello"}))
            .unwrap();
        let value: Value = pipeline.send(&request).await.unwrap();
        assert_eq!(value["audio_paths"][0], "/static/1.mp3");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let pipeline = RequestPipeline::new(fast_config("http://127.0.0.1:1/api".to_string()))
            .unwrap();
        let err = pipeline
            .send::<Value>(&RequestDescriptor::get("/status"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), None);
        assert_eq!(err.user_message(), "server unreachable");
    }

    #[tokio::test]
    async fn invalid_base_url_is_a_configuration_error() {
        let pipeline = RequestPipeline::new(fast_config("not a url".to_string())).unwrap();
        let err = pipeline
            .send::<Value>(&RequestDescriptor::get("/status"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.user_message().is_empty());
    }

    #[tokio::test]
    async fn invalid_header_is_a_configuration_error() {
        let server = MockServer::start().await;
        let pipeline = pipeline_for(&server).await;
        let request = RequestDescriptor::get("/status").header("bad header", "x");
        let err = pipeline.send::<Value>(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn always_policy_retries_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/roles"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let config = fast_config(format!("{}/api", server.uri()))
            .with_retry_policy(RetryPolicy::Always);
        let pipeline = RequestPipeline::new(config).unwrap();
        let err = pipeline
            .send::<Value>(&RequestDescriptor::get("/roles"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "invalid request parameters");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_sends_nothing() {
        let server = MockServer::start().await;
        let pipeline = pipeline_for(&server).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = pipeline
            .execute::<Value>(&RequestDescriptor::get("/status"), Some(&token))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_settles_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = pipeline
            .execute::<Value>(&RequestDescriptor::get("/status"), Some(&token))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_success_body_decodes_as_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/interrupt"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let value: Option<Value> = pipeline
            .send(&RequestDescriptor::post("/interrupt"))
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn undecodable_success_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/roles"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let pipeline = pipeline_for(&server).await;
        let err = pipeline
            .send::<Value>(&RequestDescriptor::get("/roles"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "invalid response payload");
        assert_eq!(err.status(), Some(200));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
