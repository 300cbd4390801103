use thiserror::Error;

pub mod aggregate;
pub mod backend;
pub mod client;
pub mod config_file;
pub mod context;
pub mod documents;
pub mod parser;
pub mod pipeline;
pub mod questions;
pub mod resume;
pub mod retry;
pub mod scheduler;
pub mod tabular;
pub mod writer;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend};
pub use client::{ChatRequest, ChatResponse, ExtractionClient, HttpClient, Provider};
pub use context::{Failure, FailureReason, ProgressState, RunContext};
pub use litextract_ris::{BibEntry, BibIndex};
pub use pipeline::{OutputPaths, RunInputs, RunReport, run_pipeline};
pub use questions::{Question, QuestionBank};
pub use retry::{ExtractError, RetryPolicy};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Events emitted while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A human-readable log line. `important` lines are meant for the user;
    /// the rest are routine chatter a UI may hide.
    Log { message: String, important: bool },
    /// `completed` of `total` documents are done (success, skip, or failure).
    Progress { completed: usize, total: usize },
    /// Short one-line status.
    Status(String),
}

/// Receiver for run progress. Implementations are called from every worker
/// task and must not block for long.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, message: &str, important: bool);
    fn on_progress(&self, completed: usize, total: usize);
    fn on_status(&self, status: &str);
}

impl<F> RunObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_log(&self, message: &str, important: bool) {
        self(ProgressEvent::Log {
            message: message.to_string(),
            important,
        })
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self(ProgressEvent::Progress { completed, total })
    }

    fn on_status(&self, status: &str) {
        self(ProgressEvent::Status(status.to_string()))
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert assistant assisting in extracting data for a systematic review. Your priority should be accuracy and reporting data as is, without unnecessary interpretation.";

/// Configuration for an extraction run.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub provider: Provider,
    pub model: String,
    /// Replaces the provider's endpoint when set (compatible gateways, tests).
    pub base_url: Option<String>,
    /// Sampling temperature, 0.0–2.0.
    pub temperature: f64,
    /// Nucleus sampling, 0.1–1.0.
    pub top_p: f64,
    /// Upper bound on concurrent batches, 1–100.
    pub max_workers: usize,
    /// Test mode: process a random sample of this many documents, 1–50.
    pub sample_size: Option<usize>,
    pub system_prompt: String,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"***")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_workers", &self.max_workers)
            .field("sample_size", &self.sample_size)
            .field("system_prompt", &self.system_prompt)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let provider = Provider::default();
        Self {
            api_key: String::new(),
            provider,
            model: provider.default_model().to_string(),
            base_url: None,
            temperature: 0.1,
            top_p: 0.95,
            max_workers: 20,
            sample_size: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_retries: 10,
            request_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Check the documented parameter ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.api_key.trim().is_empty() {
            return Err(CoreError::Config("API key is required".into()));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::Config("model is required".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoreError::Config(format!(
                "temperature {} outside 0.0-2.0",
                self.temperature
            )));
        }
        if !(0.1..=1.0).contains(&self.top_p) {
            return Err(CoreError::Config(format!(
                "top_p {} outside 0.1-1.0",
                self.top_p
            )));
        }
        if !(1..=100).contains(&self.max_workers) {
            return Err(CoreError::Config(format!(
                "max_workers {} outside 1-100",
                self.max_workers
            )));
        }
        if let Some(n) = self.sample_size
            && !(1..=50).contains(&n)
        {
            return Err(CoreError::Config(format!("sample size {n} outside 1-50")));
        }
        Ok(())
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn valid() -> Config {
        Config {
            api_key: "sk-test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_validate_with_key() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn out_of_range_parameters_rejected() {
        let cases = [
            Config {
                temperature: 2.5,
                ..valid()
            },
            Config {
                top_p: 0.05,
                ..valid()
            },
            Config {
                max_workers: 0,
                ..valid()
            },
            Config {
                max_workers: 101,
                ..valid()
            },
            Config {
                sample_size: Some(51),
                ..valid()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(CoreError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn base_url_overrides_provider_endpoint() {
        let mut config = valid();
        assert_eq!(config.endpoint(), Provider::DeepSeek.endpoint());
        config.base_url = Some("http://127.0.0.1:9/v1/chat/completions".into());
        assert_eq!(config.endpoint(), "http://127.0.0.1:9/v1/chat/completions");
    }

    #[test]
    fn closures_are_observers() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: ProgressEvent| seen.lock().unwrap().push(event);
        observer.on_log("hello", true);
        observer.on_progress(1, 3);
        observer.on_status("busy");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProgressEvent::Log {
                    message: "hello".into(),
                    important: true
                },
                ProgressEvent::Progress {
                    completed: 1,
                    total: 3
                },
                ProgressEvent::Status("busy".into()),
            ]
        );
    }
}
