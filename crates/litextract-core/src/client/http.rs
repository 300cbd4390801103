//! `reqwest`-backed client for OpenAI-compatible chat-completion endpoints.

use std::error::Error as _;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use super::{AttemptFailure, ChatRequest, ChatResponse, ExtractionClient};
use crate::retry::parse_retry_after;
use crate::{Config, CoreError};

const USER_AGENT: &str = concat!("litextract/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_MARKER: &str = "rate limit";

pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    name: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .field("name", &self.name)
            .finish()
    }
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint().to_string(),
            api_key: config.api_key.clone(),
            name: config.provider.name().to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ExtractionClient for HttpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, AttemptFailure>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(classify_error)?;
            read_response(resp).await
        })
    }
}

/// Read the body and turn status + body into a reply or a failure.
pub async fn read_response(resp: reqwest::Response) -> Result<ChatResponse, AttemptFailure> {
    let status = resp.status();
    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.map_err(classify_error)?;
    interpret_response(status, retry_after, &body)
}

/// Decide what a completed HTTP exchange means.
///
/// A success status whose body lacks the expected content is returned as an
/// empty [`ChatResponse`] (reported later as malformed) unless the body
/// mentions a rate limit, in which case it is retried like a 429.
pub fn interpret_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<ChatResponse, AttemptFailure> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AttemptFailure::RateLimited { retry_after });
    }
    if !status.is_success() {
        if mentions_rate_limit(body) {
            return Err(AttemptFailure::RateLimited { retry_after });
        }
        tracing::debug!(status = status.as_u16(), body = %truncate(body, 300), "error response");
        return Err(AttemptFailure::Status(status.as_u16()));
    }

    let response = match serde_json::from_str::<ChatResponse>(body) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "response body is not a chat completion");
            ChatResponse::default()
        }
    };
    if response.content().is_err() && mentions_rate_limit(body) {
        return Err(AttemptFailure::RateLimited { retry_after });
    }
    Ok(response)
}

/// Map a `reqwest` error onto the retry categories.
pub fn classify_error(err: reqwest::Error) -> AttemptFailure {
    if err.is_builder() {
        return AttemptFailure::Fatal(err.to_string());
    }
    if err.is_timeout() {
        return AttemptFailure::Timeout;
    }
    let detail = error_chain(&err);
    if is_connection_reset(&err) {
        return AttemptFailure::ConnectionReset(detail);
    }
    if err.is_connect() {
        return AttemptFailure::Connect(detail);
    }
    AttemptFailure::Transport(detail)
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

fn mentions_rate_limit(body: &str) -> bool {
    body.to_lowercase().contains(RATE_LIMIT_MARKER)
}

fn is_connection_reset(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        source = e.source();
    }
    let detail = error_chain(err).to_lowercase();
    detail.contains("connection reset") || detail.contains("connection closed before message completed")
}

/// `err: cause: cause` rendering of an error and its sources.
fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        out.push_str(": ");
        out.push_str(&e.to_string());
        source = e.source();
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
