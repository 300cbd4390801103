//! CSV reading and writing for the long-format result tables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const DOCUMENT_COLUMN: &str = "PDF File";
pub const QUESTION_COLUMN: &str = "Question";
pub const ANSWER_COLUMN: &str = "Answer";
pub const LONG_HEADER: [&str; 3] = [DOCUMENT_COLUMN, QUESTION_COLUMN, ANSWER_COLUMN];

/// One (document, question) pair of the long table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRow {
    #[serde(rename = "PDF File")]
    pub document: String,
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Answer", default)]
    pub answer: String,
}

pub fn read_long_table(path: &Path) -> Result<Vec<AnswerRow>, CoreError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Write a long table, replacing `path` only once the new file is complete.
pub fn write_long_table(path: &Path, rows: &[AnswerRow]) -> Result<(), CoreError> {
    let staging = path.with_extension("csv.partial");
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&staging)?;
        writer.write_record(LONG_HEADER)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&staging, path)?;
    Ok(())
}

/// Values of the `PDF File` column, in file order.
pub fn read_document_column(path: &Path) -> Result<Vec<String>, CoreError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let position = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == DOCUMENT_COLUMN)
        .ok_or_else(|| {
            CoreError::Config(format!(
                "{} has no '{DOCUMENT_COLUMN}' column",
                path.display()
            ))
        })?;

    let mut documents = Vec::new();
    for record in reader.records() {
        if let Some(value) = record?.get(position) {
            documents.push(value.to_string());
        }
    }
    Ok(documents)
}

/// Write an arbitrary table with a header row.
pub fn write_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), CoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(document: &str, question: &str, answer: &str) -> AnswerRow {
        AnswerRow {
            document: document.into(),
            question: question.into(),
            answer: answer.into(),
        }
    }

    #[test]
    fn long_table_header_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        let rows = vec![row("a.pdf", "Design, if any?", "RCT \"double-blind\"")];
        write_long_table(&path, &rows).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("PDF File,Question,Answer\n"));
        assert_eq!(read_long_table(&path).unwrap(), rows);
        assert!(!dir.path().join("long.csv.partial").exists());
    }

    #[test]
    fn empty_long_table_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        write_long_table(&path, &[]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "PDF File,Question,Answer\n"
        );
        assert!(read_long_table(&path).unwrap().is_empty());
    }

    #[test]
    fn document_column_found_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "Question,PDF File,Answer\nq,x.pdf,a\nq,y.pdf,\n").unwrap();
        assert_eq!(read_document_column(&path).unwrap(), vec!["x.pdf", "y.pdf"]);
    }

    #[test]
    fn document_column_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "File,Question,Answer\nx.pdf,q,a\n").unwrap();
        assert!(read_document_column(&path).is_err());
    }

    #[test]
    fn multiline_answers_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.csv");
        let rows = vec![row("a.pdf", "Q", "line one\nline two")];
        write_long_table(&path, &rows).unwrap();
        assert_eq!(read_long_table(&path).unwrap()[0].answer, "line one\nline two");
    }
}
