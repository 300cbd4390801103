//! Prompt construction.

use super::{ChatMessage, ChatRequest};
use crate::Config;
use crate::questions::QuestionBank;

/// Document text beyond this many characters is cut off.
pub const MAX_DOCUMENT_CHARS: usize = 200_000;

pub const ANSWER_FORMAT_INSTRUCTION: &str = "Please provide your answers in a numbered list. For each question, start your answer with the question number in double square brackets (e.g., [[1]] for question 1), followed by your answer on the same line or next line.";

/// The per-run request parameters that do not depend on the document.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl RequestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.provider.max_tokens(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// `1. text` entries, each followed by its indented context, blank-line separated.
pub fn render_questions(bank: &QuestionBank) -> String {
    bank.iter()
        .map(|q| {
            if q.context.is_empty() {
                format!("{}. {}", q.index, q.text)
            } else {
                format!("{}. {}\n   {}", q.index, q.text, q.context.replace('\n', " "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(system_prompt: &str, document_text: &str, bank: &QuestionBank) -> String {
    let (text, truncated) = truncate_chars(document_text, MAX_DOCUMENT_CHARS);
    let ellipsis = if truncated { "..." } else { "" };
    format!(
        "{system_prompt}\n\nPDF Document:\n{text}{ellipsis}\n\nQuestions:\n{}\n\n{ANSWER_FORMAT_INSTRUCTION}",
        render_questions(bank)
    )
}

pub fn build_request(
    settings: &RequestSettings,
    document_text: &str,
    bank: &QuestionBank,
) -> ChatRequest {
    ChatRequest {
        model: settings.model.clone(),
        messages: vec![ChatMessage {
            role: "user".into(),
            content: build_prompt(&settings.system_prompt, document_text, bank),
        }],
        temperature: settings.temperature,
        top_p: settings.top_p,
        max_tokens: settings.max_tokens,
    }
}

/// First `max` characters of `text`, and whether anything was dropped.
fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
