//! Chat-completion client used to ask the questions of one document.

pub mod http;
pub mod mock;
pub mod prompt;

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use http::HttpClient;
pub use prompt::{RequestSettings, build_prompt, build_request};

/// Remote API family. Decides the endpoint and the output-token ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    DeepSeek,
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::DeepSeek, Provider::OpenAi];

    pub fn name(self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::OpenAi => "openai",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com/chat/completions",
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            Provider::DeepSeek => 6000,
            Provider::OpenAi => 4096,
        }
    }

    /// Models known to work with this provider. The first is the default.
    pub fn models(self) -> &'static [&'static str] {
        match self {
            Provider::DeepSeek => &["deepseek-chat", "deepseek-coder"],
            Provider::OpenAi => &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo"],
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0]
    }

    /// Provider-specific environment variable holding the API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(Provider::DeepSeek),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!(
                "unknown provider '{other}' (expected 'deepseek' or 'openai')"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// JSON body of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

/// The part of a chat-completion reply we read. Every level is optional so
/// that an unexpected shape still deserializes and is reported by
/// [`ChatResponse::content`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("response has no choices[0].message.content")]
pub struct MalformedResponse;

impl ChatResponse {
    /// Build a well-formed reply carrying `content`.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: Some(ChoiceMessage {
                    content: Some(content.into()),
                }),
            }],
        }
    }

    pub fn content(&self) -> Result<&str, MalformedResponse> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .ok_or(MalformedResponse)
    }
}

/// Why one request attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// HTTP 429, or an error body mentioning a rate limit.
    RateLimited { retry_after: Option<Duration> },
    /// The connection dropped while the request was in flight.
    ConnectionReset(String),
    /// No connection could be established.
    Connect(String),
    Timeout,
    /// Non-success HTTP status other than 429.
    Status(u16),
    /// Any other transport-level failure.
    Transport(String),
    /// The request could not be built. Never retried.
    Fatal(String),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            AttemptFailure::RateLimited { retry_after: None } => write!(f, "rate limited (429)"),
            AttemptFailure::ConnectionReset(msg) => write!(f, "connection reset: {msg}"),
            AttemptFailure::Connect(msg) => write!(f, "connection failed: {msg}"),
            AttemptFailure::Timeout => write!(f, "request timed out"),
            AttemptFailure::Status(code) => write!(f, "HTTP {code}"),
            AttemptFailure::Transport(msg) | AttemptFailure::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AttemptFailure {}

/// Something that can answer a chat-completion request.
///
/// One call is one attempt; retrying is the caller's job
/// (see [`query_with_retry`](crate::retry::query_with_retry)).
pub trait ExtractionClient: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, AttemptFailure>> + Send + 'a>>;
}
