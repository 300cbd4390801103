//! Decoding the model's reply into one answer per question.

use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[(\d+)\]\]").unwrap());
static NUMBERED_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\n)\s*\d+\.\s*").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Split `reply` into exactly `count` answers.
///
/// Answers are taken from `[[n]]` markers: everything after the first
/// `[[n]]` up to the next marker of any number (or the end). If no marker
/// yields text, falls back to `1. ... 2. ...` numbered lines assigned in
/// order. Unanswered questions are empty strings.
pub fn parse_answers(reply: &str, count: usize) -> Vec<String> {
    let mut answers = vec![String::new(); count];

    let markers: Vec<(usize, usize, &str)> = MARKER_RE
        .captures_iter(reply)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str();
            Some((whole.start(), whole.end(), number))
        })
        .collect();

    for (i, answer) in answers.iter_mut().enumerate() {
        let wanted = (i + 1).to_string();
        let Some(pos) = markers.iter().position(|(_, _, n)| *n == wanted) else {
            continue;
        };
        let start = markers[pos].1;
        let end = markers.get(pos + 1).map_or(reply.len(), |m| m.0);
        *answer = collapse_whitespace(&reply[start..end]);
    }

    if answers.iter().all(String::is_empty) {
        let segments = NUMBERED_LINE_RE
            .split(reply)
            .skip(1)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for (answer, segment) in answers.iter_mut().zip(segments) {
            *answer = collapse_whitespace(segment);
        }
    }

    answers
}

fn collapse_whitespace(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").into_owned()
}
