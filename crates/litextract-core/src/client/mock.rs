//! Mock extraction client for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{AttemptFailure, ChatRequest, ChatResponse, ExtractionClient};

/// A configurable mock response for [`MockClient`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// A well-formed reply with this text as the message content.
    Reply(String),
    /// A 200 reply without `choices[0].message.content`.
    Malformed,
    RateLimited { retry_after: Option<Duration> },
    ConnectionReset,
    ConnectFailed,
    Timeout,
    Status(u16),
    Fatal(String),
}

impl MockResponse {
    pub fn reply(text: impl Into<String>) -> Self {
        MockResponse::Reply(text.into())
    }
}

/// A hand-rolled [`ExtractionClient`] for tests.
///
/// Supports:
/// - A fixed response (used for every call), **or**
/// - A sequence of responses (one per call, repeating the last when exhausted).
/// - Optional per-call latency.
/// - Call counting via [`call_count()`](MockClient::call_count).
pub struct MockClient {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Return responses in order, then keep repeating the last one.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        responses.reverse();
        let fallback = responses[0].clone();
        Self {
            responses: Mutex::new(responses),
            ..Self::new(fallback)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `send()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompt text of every request received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl ExtractionClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, AttemptFailure>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = request.messages.first() {
            self.prompts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(message.content.clone());
        }
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Reply(text) => Ok(ChatResponse::with_content(text)),
                MockResponse::Malformed => Ok(ChatResponse::default()),
                MockResponse::RateLimited { retry_after } => {
                    Err(AttemptFailure::RateLimited { retry_after })
                }
                MockResponse::ConnectionReset => Err(AttemptFailure::ConnectionReset(
                    "connection reset by peer".into(),
                )),
                MockResponse::ConnectFailed => {
                    Err(AttemptFailure::Connect("connection refused".into()))
                }
                MockResponse::Timeout => Err(AttemptFailure::Timeout),
                MockResponse::Status(code) => Err(AttemptFailure::Status(code)),
                MockResponse::Fatal(msg) => Err(AttemptFailure::Fatal(msg)),
            }
        })
    }
}
