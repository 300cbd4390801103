//! Question bank loading.
//!
//! The bank is a CSV sheet with a `Question` column and optional answer
//! hint columns. Column lookup is by header name; the first column is taken
//! as the author's question number whatever its header says.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::context::RunContext;

pub const QUESTION_COLUMN: &str = "Question";
pub const OPTIONS_COLUMN: &str = "Recommended Answer Options";
pub const INSTRUCTIONS_COLUMN: &str = "Additional Instructions";
pub const EXAMPLE_COLUMNS: [&str; 5] = [
    "Example Answer 1",
    "Example Answer 2",
    "Example Answer 3",
    "Example Answer 4",
    "Example Answer 5",
];

#[derive(Error, Debug)]
pub enum QuestionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// 1-based position in the bank. Prompts and result columns use this.
    pub index: usize,
    /// Number from the sheet's leading column, or the 1-based row number
    /// when that cell is blank or not a number.
    pub declared_number: usize,
    pub text: String,
    /// Options, instructions and examples, newline-joined. Possibly empty.
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// Build a bank from bare question texts with no context.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let questions = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Question {
                index: i + 1,
                declared_number: i + 1,
                text: text.into(),
                context: String::new(),
            })
            .collect();
        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Question> {
        self.questions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        index.checked_sub(1).and_then(|i| self.questions.get(i))
    }

    pub fn texts(&self) -> Vec<&str> {
        self.questions.iter().map(|q| q.text.as_str()).collect()
    }

    /// Context keyed by question index.
    pub fn context_map(&self) -> BTreeMap<usize, &str> {
        self.questions
            .iter()
            .map(|q| (q.index, q.context.as_str()))
            .collect()
    }
}

/// Load the question bank, logging and returning an empty bank on any error.
pub fn load_questions(path: &Path, ctx: &RunContext) -> QuestionBank {
    match load_question_bank(path) {
        Ok(bank) => {
            ctx.log(format!("Extracted {} questions", bank.len()), true);
            let renumbered = bank.iter().filter(|q| q.declared_number != q.index).count();
            if renumbered > 0 {
                tracing::warn!(
                    renumbered,
                    "question numbers in the sheet differ from their positions; prompts use positions"
                );
            }
            bank
        }
        Err(e) => {
            ctx.log(
                format!("Error reading questions file {}: {e}", path.display()),
                true,
            );
            QuestionBank::default()
        }
    }
}

pub fn load_question_bank(path: &Path) -> Result<QuestionBank, QuestionError> {
    let file = std::fs::File::open(path)?;
    parse_question_bank(file)
}

/// Parse a question bank from CSV content (useful for testing).
pub fn parse_question_bank<R: Read>(reader: R) -> Result<QuestionBank, QuestionError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let question_col =
        column(QUESTION_COLUMN).ok_or(QuestionError::MissingColumn(QUESTION_COLUMN))?;
    let options_col = column(OPTIONS_COLUMN);
    let instructions_col = column(INSTRUCTIONS_COLUMN);
    let example_cols: Vec<usize> = EXAMPLE_COLUMNS.iter().filter_map(|c| column(*c)).collect();

    let mut questions = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let cell = |col: Option<usize>| col.and_then(|c| record.get(c)).map(str::trim).unwrap_or("");

        let text = cell(Some(question_col));
        if text.is_empty() {
            continue;
        }

        let mut parts: Vec<String> = Vec::new();
        for hint in [cell(options_col), cell(instructions_col)] {
            if !hint.is_empty() {
                parts.push(hint.to_string());
            }
        }
        let examples: Vec<&str> = example_cols
            .iter()
            .map(|&c| cell(Some(c)))
            .filter(|e| !e.is_empty())
            .collect();
        if !examples.is_empty() {
            parts.push(format!("Example answers: {}", examples.join("; ")));
        }

        questions.push(Question {
            index: questions.len() + 1,
            declared_number: parse_number(cell(Some(0))).unwrap_or(row_idx + 1),
            text: text.to_string(),
            context: parts.join("\n"),
        });
    }

    Ok(QuestionBank { questions })
}

/// Accepts `3` and spreadsheet-style `3.0`.
fn parse_number(cell: &str) -> Option<usize> {
    if let Ok(n) = cell.parse::<usize>() {
        return Some(n);
    }
    let f = cell.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: &str = "\
No,Question,Recommended Answer Options,Additional Instructions,Example Answer 1,Example Answer 2
1,What is the study design?,RCT / cohort / case-control,Use the methods section,RCT,
2,,ignored,,,
3,Sample size?,,Report the total N,120,n=45
x,Country?,,,,
";

    #[test]
    fn skips_empty_questions_and_numbers_densely() {
        let bank = parse_question_bank(BANK.as_bytes()).unwrap();
        assert_eq!(
            bank.texts(),
            vec!["What is the study design?", "Sample size?", "Country?"]
        );
        let indices: Vec<usize> = bank.iter().map(|q| q.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn declared_number_falls_back_to_row_position() {
        let bank = parse_question_bank(BANK.as_bytes()).unwrap();
        let declared: Vec<usize> = bank.iter().map(|q| q.declared_number).collect();
        // "x" is not a number; it is the fourth data row.
        assert_eq!(declared, vec![1, 3, 4]);
    }

    #[test]
    fn context_joins_hints_and_examples() {
        let bank = parse_question_bank(BANK.as_bytes()).unwrap();
        assert_eq!(
            bank.get(1).unwrap().context,
            "RCT / cohort / case-control\nUse the methods section\nExample answers: RCT"
        );
        assert_eq!(
            bank.get(2).unwrap().context,
            "Report the total N\nExample answers: 120; n=45"
        );
        assert_eq!(bank.get(3).unwrap().context, "");
    }

    #[test]
    fn context_map_covers_every_question() {
        let bank = parse_question_bank(BANK.as_bytes()).unwrap();
        let map = bank.context_map();
        assert_eq!(map.len(), bank.len());
        assert!(map.keys().all(|&i| bank.get(i).is_some()));
    }

    #[test]
    fn only_question_column_required() {
        let bank = parse_question_bank("#,Question\n1,Only one\n".as_bytes()).unwrap();
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.get(1).unwrap().context, "");
    }

    #[test]
    fn missing_question_column_is_error() {
        let err = parse_question_bank("#,Prompt\n1,What?\n".as_bytes()).unwrap_err();
        assert!(matches!(err, QuestionError::MissingColumn("Question")));
    }

    #[test]
    fn spreadsheet_float_numbers() {
        assert_eq!(parse_number("7.0"), Some(7));
        assert_eq!(parse_number("7.5"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn from_texts_has_no_context() {
        let bank = QuestionBank::from_texts(["A?", "B?"]);
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.get(2).unwrap().text, "B?");
        assert!(bank.get(0).is_none());
    }
}
