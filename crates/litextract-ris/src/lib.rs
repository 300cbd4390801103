use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub mod matching;

pub use matching::MatchStrategy;

#[derive(Error, Debug)]
pub enum RisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bibliographic metadata for one exported record.
///
/// Every field defaults to the empty string when the record lacks the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibEntry {
    pub title: String,
    /// Authors in export order, joined with `"; "`.
    pub authors: String,
    pub journal: String,
    /// Four-digit year.
    pub year: String,
    pub doi: String,
    pub abstract_text: String,
}

impl BibEntry {
    fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.authors.is_empty()
            && self.journal.is_empty()
            && self.year.is_empty()
            && self.doi.is_empty()
            && self.abstract_text.is_empty()
    }
}

/// Mapping from candidate filename keys to bibliographic entries.
///
/// A single record is usually reachable through several keys (the bare
/// filename and the `files/<id>/<name>.pdf` attachment path). Keys keep the
/// order in which they were first seen; a later record exporting the same key
/// replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct BibIndex {
    entries: Vec<BibEntry>,
    keys: Vec<(String, usize)>,
    positions: HashMap<String, usize>,
}

impl BibIndex {
    /// Number of distinct filename keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of records that were reachable through at least one key.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Exact key lookup.
    pub fn get(&self, key: &str) -> Option<&BibEntry> {
        self.positions
            .get(key)
            .map(|&pos| &self.entries[self.keys[pos].1])
    }

    /// Iterate `(key, entry)` pairs in first-seen key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BibEntry)> {
        self.keys
            .iter()
            .map(|(key, idx)| (key.as_str(), &self.entries[*idx]))
    }

    fn insert(&mut self, entry: BibEntry, keys: Vec<String>) {
        let idx = self.entries.len();
        self.entries.push(entry);
        for key in keys {
            match self.positions.get(&key) {
                Some(&pos) => self.keys[pos].1 = idx,
                None => {
                    self.positions.insert(key.clone(), self.keys.len());
                    self.keys.push((key, idx));
                }
            }
        }
    }
}

/// Parse an RIS export file.
pub fn parse_ris_file(path: &Path) -> Result<BibIndex, RisError> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(parse_ris_str(&content))
}

/// Parse RIS content from a string (useful for testing).
///
/// Single forward pass over `TAG  - value` lines. `TY` opens a record and
/// `ER` closes it; both flush whatever has been accumulated so far, as does
/// the end of input.
pub fn parse_ris_str(content: &str) -> BibIndex {
    let mut index = BibIndex::default();
    let mut record = Record::default();

    for line in content.trim_start_matches('\u{feff}').lines() {
        let Some((tag, value)) = split_tag(line) else {
            continue;
        };

        match tag {
            "TY" | "ER" => {
                std::mem::take(&mut record).flush_into(&mut index);
            }
            "TI" => record.entry.title = value.to_string(),
            "AU" => record.authors.push(value.to_string()),
            "T2" | "JO" | "JF" => record.entry.journal = value.to_string(),
            "PY" | "Y1" => {
                static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());
                if let Some(m) = YEAR_RE.find(value) {
                    record.entry.year = m.as_str().to_string();
                }
            }
            "DO" => record.entry.doi = value.to_string(),
            "AB" | "N2" => record.entry.abstract_text = value.to_string(),
            "UR" | "L1" | "L2" | "L4" => {
                if !value.is_empty() {
                    record.keys.extend(filename_keys(value));
                }
            }
            _ => {}
        }
    }
    record.flush_into(&mut index);

    index
}

/// Accumulator for the record currently being read.
#[derive(Default)]
struct Record {
    entry: BibEntry,
    authors: Vec<String>,
    keys: Vec<String>,
}

impl Record {
    fn flush_into(mut self, index: &mut BibIndex) {
        if self.keys.is_empty() {
            return;
        }
        if !self.authors.is_empty() {
            self.entry.authors = self.authors.join("; ");
        }
        if self.entry.is_empty() {
            return;
        }
        index.insert(self.entry, self.keys);
    }
}

/// Split `"AU  - Smith, J."` into `("AU", "Smith, J.")`.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches('\r');
    let tag = line.get(..2)?;
    let rest = line.get(2..)?;
    if !rest.starts_with("  -") || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((tag, rest[3..].trim()))
}

/// Harvest candidate filename keys from a URL or file-link value.
///
/// Local attachment links (`file:///`, `files/...`, Windows paths) yield the
/// final path segment when it is a PDF, plus the `files/<id>/<name>` suffix
/// when the path has a `files` directory followed by at least two segments.
/// Remote URLs are kept whole when they point at a PDF.
fn filename_keys(url: &str) -> Vec<String> {
    let mut keys = Vec::new();

    if url.contains("file:///") || url.contains("files/") || url.contains('\\') {
        let path = url.replace("file:///", "").replace('\\', "/");
        let parts: Vec<&str> = path.split('/').collect();

        if let Some(last) = parts.last()
            && is_pdf_name(last)
        {
            keys.push((*last).to_string());
        }

        if parts.len() >= 3
            && let Some(files_idx) = parts.iter().position(|p| *p == "files")
            && files_idx + 2 < parts.len()
        {
            keys.push(parts[files_idx..].join("/"));
        }
    } else if is_pdf_name(url) {
        keys.push(url.to_string());
    }

    keys
}

fn is_pdf_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".pdf")
}
