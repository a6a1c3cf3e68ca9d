//! Retrying HTTP transport shared by every provider client.
//!
//! Each attempt runs under a per-attempt timeout and the caller's
//! [`CallContext`]. Network failures, timeouts, 429 and 5xx responses are
//! retried with exponential backoff; any other non-success status is returned
//! immediately as [`LlmError::NonRetryable`].

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Request, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use mneme_core::config::LlmConfig;

use crate::context::CallContext;
use crate::error::LlmError;

/// Retry schedule for one transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first. At least 1.
    pub max_attempts: u32,
    /// Timeout applied to each attempt.
    pub per_attempt_timeout: Duration,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any delay, including server-supplied `Retry-After`.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomize each delay by ±10%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            per_attempt_timeout: Duration::from_secs(90),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with the given attempt count and per-attempt timeout.
    #[must_use]
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            per_attempt_timeout,
            ..Self::default()
        }
    }

    /// Set the initial and maximum backoff.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build from the retry fields of a provider config.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        Self::new(config.max_attempts, timeout).with_backoff(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay before retry number `retry` (0 for the first retry).
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let mut secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if self.jitter {
            secs *= rand::thread_rng().gen_range(0.9..=1.1);
        }
        let max = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs > max {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// HTTP client plus retry policy.
#[derive(Debug, Clone)]
pub struct RetryTransport {
    http: Client,
    policy: RetryPolicy,
}

impl RetryTransport {
    /// A transport with a fresh HTTP client.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_client(Client::new(), policy)
    }

    /// A transport over an existing HTTP client.
    #[must_use]
    pub fn with_client(http: Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    /// The underlying HTTP client, for building requests.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// The retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Returns the first successful reply with its body fully read. The
    /// per-attempt timeout covers both the response head and the body.
    ///
    /// # Errors
    /// - [`LlmError::Cancelled`] if `ctx` is cancelled or expires, including
    ///   during a backoff sleep.
    /// - [`LlmError::NonRetryable`] for 4xx responses other than 429, and 501.
    /// - [`LlmError::RetriesExhausted`] wrapping the last transient failure.
    /// - [`LlmError::Request`] if the request body cannot be replayed.
    pub async fn send(&self, ctx: &CallContext, request: Request) -> Result<Reply, LlmError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let timeout = self.policy.per_attempt_timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.check()?;

            let req = request
                .try_clone()
                .ok_or_else(|| LlmError::Request("request body cannot be replayed".into()))?;
            let url = req.url().path().to_string();

            let outcome = ctx
                .run(tokio::time::timeout(timeout, self.attempt(req)))
                .await?;

            let (err, server_delay) = match outcome {
                Err(_) => (LlmError::Timeout(timeout_ms), None),
                Ok(Err(e)) => (LlmError::from(e), None),
                Ok(Ok((reply, wait))) => {
                    if reply.status.is_success() {
                        if attempt > 1 {
                            debug!(attempt, path = %url, "LLM request succeeded after retry");
                        }
                        return Ok(reply);
                    }
                    (classify(reply.status, reply.text()), wait)
                }
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = server_delay
                .map(|d| d.min(self.policy.max_backoff))
                .unwrap_or_else(|| self.policy.backoff_delay(attempt - 1));
            warn!(
                attempt,
                max_attempts,
                status = err.status(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                path = %url,
                error = %err,
                "LLM request failed, retrying"
            );
            ctx.sleep(delay).await?;
        }
    }

    /// One round trip: response head, then the whole body.
    async fn attempt(&self, req: Request) -> Result<(Reply, Option<Duration>), reqwest::Error> {
        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let wait = retry_after(status, resp.headers());
        let body = resp.bytes().await?.to_vec();
        Ok((Reply { status, body }, wait))
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Response status.
    pub status: StatusCode,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl Reply {
    /// Decode the body as JSON.
    ///
    /// # Errors
    /// [`LlmError::Parse`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        serde_json::from_slice(&self.body).map_err(|e| LlmError::Parse(e.to_string()))
    }

    /// The body as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Map a non-success status to a retryable or terminal error.
fn classify(status: StatusCode, body: String) -> LlmError {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED);
    if retryable {
        LlmError::Transient {
            status: Some(status.as_u16()),
            message: body,
            source: None,
        }
    } else {
        LlmError::NonRetryable {
            status: status.as_u16(),
            body,
        }
    }
}

/// `Retry-After` in seconds, honored on 429 and 503 only.
fn retry_after(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(5))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false)
    }

    fn request(transport: &RetryTransport, server: &MockServer) -> Request {
        transport
            .http()
            .post(format!("{}/v1/chat/completions", server.uri()))
            .json(&json!({ "model": "gpt-4" }))
            .build()
            .expect("request")
    }

    const STALLED_HEAD: &str =
        "content-type: application/json\r\ncontent-length: 100\r\n\r\n{\"a\":1,";

    /// A server that sends `status_line`, headers promising 100 body bytes and
    /// a few of them, then stalls. Returns the URL and a connection counter.
    async fn stalling_server(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let head = format!("{status_line}\r\n{STALLED_HEAD}");
                    let _ = socket.write_all(head.as_bytes()).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });
        (format!("http://{addr}/v1/chat/completions"), accepted)
    }

    async fn assert_stalled_body_retried(status_line: &'static str) {
        let (url, accepted) = stalling_server(status_line).await;
        let policy = RetryPolicy::new(3, Duration::from_millis(50))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(1))
            .with_jitter(false);
        let transport = RetryTransport::new(policy);
        let req = transport
            .http()
            .post(url)
            .json(&json!({ "model": "gpt-4" }))
            .build()
            .expect("request");
        let ctx = CallContext::new().with_timeout(Duration::from_secs(2));

        let started = std::time::Instant::now();
        let err = transport.send(&ctx, req).await.expect_err("body never completes");
        match err {
            LlmError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, LlmError::Timeout(50)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.expect("recording enabled").len()
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350))
            .with_jitter(false);
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1))
            .with_backoff(Duration::from_millis(1000), Duration::from_secs(10));
        for _ in 0..50 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_millis(899) && delay <= Duration::from_millis(1101));
        }
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).max_attempts, 1);
    }

    #[test]
    fn status_classification() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify(StatusCode::BAD_REQUEST, String::new()).is_retryable());
        assert!(!classify(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!classify(StatusCode::NOT_IMPLEMENTED, String::new()).is_retryable());
    }

    #[test]
    fn retry_after_only_for_throttling() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().expect("header"));
        let seven = Some(Duration::from_secs(7));
        assert_eq!(retry_after(StatusCode::TOO_MANY_REQUESTS, &headers), seven);
        assert_eq!(retry_after(StatusCode::SERVICE_UNAVAILABLE, &headers), seven);
        assert_eq!(retry_after(StatusCode::BAD_GATEWAY, &headers), None);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(5));
        let reply = transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect("third attempt succeeds");
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.text(), "ok");
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("context_length_exceeded"))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(5));
        let err = transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect_err("400 fails");
        assert!(matches!(
            err,
            LlmError::NonRetryable { status: 400, ref body } if body.contains("context_length")
        ));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(5));
        let err = transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect_err("401 fails");
        assert_eq!(err.status(), Some(401));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(3));
        let err = transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect_err("always 503");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.status(), Some(503));
        assert_eq!(request_count(&server).await, 3);
    }

    #[tokio::test]
    async fn honors_retry_after_on_throttle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(2));
        transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect("retried after throttle");
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn cancelled_context_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(5));
        let ctx = CallContext::new();
        ctx.cancel();
        let err = transport
            .send(&ctx, request(&transport, &server))
            .await
            .expect_err("cancelled");
        assert!(err.is_cancellation());
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let policy = RetryPolicy::new(2, Duration::from_millis(50))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(1))
            .with_jitter(false);
        let transport = RetryTransport::new(policy);
        let err = transport
            .send(&CallContext::new(), request(&transport, &server))
            .await
            .expect_err("every attempt times out");
        match err {
            LlmError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, LlmError::Timeout(50)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stalled_error_body_times_out_and_retries() {
        assert_stalled_body_retried("HTTP/1.1 500 Internal Server Error").await;
    }

    #[tokio::test]
    async fn stalled_success_body_times_out_and_retries() {
        assert_stalled_body_retried("HTTP/1.1 200 OK").await;
    }

    #[tokio::test]
    async fn context_deadline_stops_in_flight_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = RetryTransport::new(fast_policy(5));
        let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
        let err = transport
            .send(&ctx, request(&transport, &server))
            .await
            .expect_err("deadline");
        assert!(matches!(err, LlmError::Cancelled(crate::error::CancelReason::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let policy = RetryPolicy::new(5, Duration::from_secs(5))
            .with_backoff(Duration::from_secs(10), Duration::from_secs(10))
            .with_jitter(false);
        let transport = RetryTransport::new(policy);
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = transport
            .send(&ctx, request(&transport, &server))
            .await
            .expect_err("cancelled during backoff");
        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(request_count(&server).await, 1);
    }
}
