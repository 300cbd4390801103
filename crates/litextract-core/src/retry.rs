//! Bounded retry with per-failure backoff and cooperative cancellation.
//!
//! Each attempt is one call to [`ExtractionClient::send`]. A failed attempt
//! is either retried after a computed wait or ends the loop; the wait is a
//! timer raced against the run's cancellation token, and the token is checked
//! again before every attempt.

use std::time::Duration;

use thiserror::Error;

use crate::Config;
use crate::client::{AttemptFailure, ChatRequest, ChatResponse, ExtractionClient};
use crate::context::RunContext;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub rate_limit_wait: Duration,
    pub connection_reset_wait: Duration,
    pub connect_wait: Duration,
    pub timeout_wait: Duration,
    pub transport_wait: Duration,
    /// Uniform random extra wait in `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            rate_limit_wait: Duration::from_secs(60),
            connection_reset_wait: Duration::from_secs(10),
            connect_wait: Duration::from_secs(15),
            timeout_wait: Duration::from_secs(20),
            transport_wait: Duration::from_secs(10),
            max_jitter: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Wait before the next attempt, or `None` if `failure` is not retryable.
    ///
    /// A server-supplied `Retry-After` longer than the policy wait wins.
    pub fn backoff(&self, failure: &AttemptFailure) -> Option<Duration> {
        let base = match failure {
            AttemptFailure::RateLimited { retry_after } => {
                let wait = self.rate_limit_wait;
                retry_after.map_or(wait, |ra| ra.max(wait))
            }
            AttemptFailure::ConnectionReset(_) => self.connection_reset_wait,
            AttemptFailure::Connect(_) => self.connect_wait,
            AttemptFailure::Timeout => self.timeout_wait,
            AttemptFailure::Status(_) | AttemptFailure::Transport(_) => self.transport_wait,
            AttemptFailure::Fatal(_) => return None,
        };
        Some(base + self.jitter())
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(fastrand::f64() * self.max_jitter.as_secs_f64())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// The run was cancelled before or between attempts.
    #[error("Processing stopped by user")]
    Cancelled,
    #[error("Max retries ({attempts}) exceeded.")]
    RetriesExhausted {
        attempts: u32,
        last: Option<AttemptFailure>,
    },
    #[error("{0}")]
    Fatal(AttemptFailure),
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-dates are not worth a date parser; the policy wait dominates anyway.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// Send `request` until it succeeds, fails fatally, runs out of attempts or
/// the run is cancelled.
///
/// An in-flight attempt is never interrupted; cancellation is observed at
/// the top of each attempt and ends a backoff wait early. No wait follows
/// the final attempt.
pub async fn query_with_retry(
    client: &dyn ExtractionClient,
    request: &ChatRequest,
    policy: &RetryPolicy,
    ctx: &RunContext,
) -> Result<ChatResponse, ExtractError> {
    let max = policy.max_retries;
    let mut last = None;

    for attempt in 1..=max {
        if ctx.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let failure = match client.send(request).await {
            Ok(response) => return Ok(response),
            Err(failure) => failure,
        };

        let Some(wait) = policy.backoff(&failure) else {
            tracing::warn!(client = client.name(), error = %failure, "request failed, not retrying");
            return Err(ExtractError::Fatal(failure));
        };

        ctx.log(retry_message(&failure, attempt, max, wait), false);
        last = Some(failure);

        if attempt == max {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = ctx.cancel_token().cancelled() => {}
        }
    }

    Err(ExtractError::RetriesExhausted {
        attempts: max,
        last,
    })
}

fn retry_message(failure: &AttemptFailure, attempt: u32, max: u32, wait: Duration) -> String {
    let secs = wait.as_secs_f64();
    match failure {
        AttemptFailure::RateLimited { .. } => {
            format!("Rate limit hit. Waiting {secs:.1} seconds...")
        }
        AttemptFailure::ConnectionReset(_) => {
            format!("Connection broken (attempt {attempt}/{max}). Waiting {secs:.1}s...")
        }
        AttemptFailure::Connect(_) => {
            format!("Connection error (attempt {attempt}/{max}). Waiting {secs:.1}s...")
        }
        AttemptFailure::Timeout => {
            format!("Request timeout (attempt {attempt}/{max}). Waiting {secs:.1}s...")
        }
        other => format!("Request error (attempt {attempt}/{max}): {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgressEvent;
    use crate::client::ChatMessage;
    use crate::client::mock::{MockClient, MockResponse};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "deepseek-chat".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "prompt".into(),
            }],
            temperature: 0.1,
            top_p: 0.95,
            max_tokens: 6000,
        }
    }

    fn context() -> (RunContext, Arc<Mutex<Vec<String>>>) {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        let observer = move |event: ProgressEvent| {
            if let ProgressEvent::Log { message, .. } = event {
                sink.lock().unwrap().push(message);
            }
        };
        (
            RunContext::new(Arc::new(observer), CancellationToken::new()),
            logs,
        )
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        }
    }

    // ── backoff ────────────────────────────────────────────────────────

    #[test]
    fn base_waits_per_failure_kind() {
        let p = RetryPolicy::default().without_jitter();
        let secs = |f: AttemptFailure| p.backoff(&f).map(|d| d.as_secs());
        assert_eq!(secs(AttemptFailure::RateLimited { retry_after: None }), Some(60));
        assert_eq!(secs(AttemptFailure::ConnectionReset(String::new())), Some(10));
        assert_eq!(secs(AttemptFailure::Connect(String::new())), Some(15));
        assert_eq!(secs(AttemptFailure::Timeout), Some(20));
        assert_eq!(secs(AttemptFailure::Status(502)), Some(10));
        assert_eq!(secs(AttemptFailure::Transport(String::new())), Some(10));
        assert_eq!(secs(AttemptFailure::Fatal(String::new())), None);
    }

    #[test]
    fn jitter_stays_below_ceiling() {
        let p = RetryPolicy::default();
        for _ in 0..200 {
            let wait = p.backoff(&AttemptFailure::Timeout).unwrap();
            assert!(wait >= Duration::from_secs(20));
            assert!(wait < Duration::from_secs(25));
        }
    }

    #[test]
    fn longer_retry_after_wins() {
        let p = RetryPolicy::default().without_jitter();
        let long = AttemptFailure::RateLimited {
            retry_after: Some(Duration::from_secs(90)),
        };
        let short = AttemptFailure::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(p.backoff(&long), Some(Duration::from_secs(90)));
        assert_eq!(p.backoff(&short), Some(Duration::from_secs(60)));
    }

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
    }

    #[test]
    fn parse_http_date_is_conservative() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    // ── query_with_retry ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_immediately() {
        let client = MockClient::new(MockResponse::reply("[[1]] Yes"));
        let (ctx, logs) = context();
        let reply = query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap();
        assert_eq!(reply.content().unwrap(), "[[1]] Yes");
        assert_eq!(client.call_count(), 1);
        assert!(logs.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_a_minute_then_succeeds() {
        let client = MockClient::with_sequence(vec![
            MockResponse::RateLimited { retry_after: None },
            MockResponse::reply("[[1]] ok"),
        ]);
        let (ctx, logs) = context();
        let start = Instant::now();

        let reply = query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap();

        assert_eq!(reply.content().unwrap(), "[[1]] ok");
        assert_eq!(client.call_count(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(65), "{elapsed:?}");
        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("Rate limit hit. Waiting 6"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_skips_final_wait() {
        let client = MockClient::new(MockResponse::Timeout);
        let (ctx, logs) = context();
        let start = Instant::now();

        let err = query_with_retry(&client, &request(), &policy(3), &ctx)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ExtractError::RetriesExhausted {
                attempts: 3,
                last: Some(AttemptFailure::Timeout)
            }
        );
        assert_eq!(err.to_string(), "Max retries (3) exceeded.");
        assert_eq!(client.call_count(), 3);
        // Two waits of 20-25 s, none after the third attempt.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(40), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(50), "{elapsed:?}");
        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[2].starts_with("Request timeout (attempt 3/3)"));
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_failures_log_their_own_messages() {
        let client = MockClient::with_sequence(vec![
            MockResponse::ConnectionReset,
            MockResponse::ConnectFailed,
            MockResponse::Status(502),
            MockResponse::reply("done"),
        ]);
        let (ctx, logs) = context();
        query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap();

        let logs = logs.lock().unwrap();
        assert!(logs[0].starts_with("Connection broken (attempt 1/10)"));
        assert!(logs[1].starts_with("Connection error (attempt 2/10)"));
        assert_eq!(logs[2], "Request error (attempt 3/10): HTTP 502");
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_is_not_retried() {
        let client = MockClient::new(MockResponse::Fatal("invalid header value".into()));
        let (ctx, _) = context();
        let err = query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Fatal(AttemptFailure::Fatal(_))));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_makes_no_call() {
        let client = MockClient::new(MockResponse::reply("unused"));
        let (ctx, _) = context();
        ctx.cancel_token().cancel();
        let err = query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ExtractError::Cancelled);
        assert_eq!(err.to_string(), "Processing stopped by user");
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_cuts_backoff_short() {
        let client = MockClient::new(MockResponse::RateLimited { retry_after: None });
        let (ctx, _) = context();
        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let start = Instant::now();

        let err = query_with_retry(&client, &request(), &policy(10), &ctx)
            .await
            .unwrap_err();

        assert_eq!(err, ExtractError::Cancelled);
        assert_eq!(client.call_count(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_budget_makes_no_call() {
        let client = MockClient::new(MockResponse::reply("unused"));
        let (ctx, _) = context();
        let err = query_with_retry(&client, &request(), &policy(0), &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractError::RetriesExhausted {
                attempts: 0,
                last: None
            }
        );
        assert_eq!(client.call_count(), 0);
    }
}
