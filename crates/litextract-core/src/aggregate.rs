//! Long → wide conversion with bibliographic enrichment.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use litextract_ris::{BibEntry, BibIndex};

use crate::CoreError;
use crate::context::RunContext;
use crate::tabular::{AnswerRow, DOCUMENT_COLUMN, read_long_table, write_table};

pub const BIB_COLUMNS: [&str; 6] = ["Title", "Authors", "Journal", "Year", "DOI", "Abstract"];

const LABEL_MAX_CHARS: usize = 50;
const LABEL_KEEP_CHARS: usize = 47;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Documents the bibliographic index had an entry for.
    pub matched: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSummary {
    pub rows: usize,
    pub columns: usize,
    /// `(matched, total)` when a non-empty index was supplied.
    pub matched: Option<(usize, usize)>,
}

/// Column label text for a question, cut to 47 chars + `...` past 50 chars.
pub fn question_label(text: &str) -> String {
    if text.chars().count() > LABEL_MAX_CHARS {
        let kept: String = text.chars().take(LABEL_KEEP_CHARS).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

/// Pivot long rows into one row per document.
///
/// A row's question number is its position within its document's rows.
/// Documents are sorted; bibliographic columns are added only when `index`
/// is non-empty.
pub fn build_wide_table(rows: &[AnswerRow], index: &BibIndex) -> WideTable {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut labels: BTreeMap<usize, &str> = BTreeMap::new();

    for row in rows {
        let slot = *positions.entry(row.document.as_str()).or_insert_with(|| {
            groups.push((row.document.as_str(), Vec::new()));
            groups.len() - 1
        });
        let answers = &mut groups[slot].1;
        answers.push(row.answer.as_str());
        labels.entry(answers.len()).or_insert(row.question.as_str());
    }
    groups.sort_by(|a, b| a.0.cmp(b.0));

    let with_bib = !index.is_empty();
    let mut header = vec![DOCUMENT_COLUMN.to_string()];
    if with_bib {
        header.extend(BIB_COLUMNS.iter().map(|c| c.to_string()));
    }
    header.extend(
        labels
            .iter()
            .map(|(n, text)| format!("Q{n}: {}", question_label(text))),
    );

    let question_count = labels.len();
    let mut matched = 0;
    let wide_rows = groups
        .into_iter()
        .map(|(document, answers)| {
            let mut row = vec![document.to_string()];
            if with_bib {
                let entry = index.find(document);
                if entry.is_some() {
                    matched += 1;
                }
                row.extend(bib_cells(entry));
            }
            row.extend(
                (0..question_count).map(|i| answers.get(i).copied().unwrap_or("").to_string()),
            );
            row
        })
        .collect();

    WideTable {
        header,
        rows: wide_rows,
        matched,
    }
}

fn bib_cells(entry: Option<&BibEntry>) -> [String; 6] {
    match entry {
        Some(e) => [
            e.title.clone(),
            e.authors.clone(),
            e.journal.clone(),
            e.year.clone(),
            e.doi.clone(),
            e.abstract_text.clone(),
        ],
        None => Default::default(),
    }
}

/// Read the long table at `long`, write the wide table to `wide`.
pub fn aggregate_file(
    long: &Path,
    wide: &Path,
    index: &BibIndex,
    ctx: &RunContext,
) -> Result<AggregateSummary, CoreError> {
    ctx.log("Converting to wide format...", false);
    let rows = read_long_table(long)?;
    let table = build_wide_table(&rows, index);
    write_table(wide, &table.header, &table.rows)?;

    let summary = AggregateSummary {
        rows: table.rows.len(),
        columns: table.header.len(),
        matched: (!index.is_empty()).then_some((table.matched, table.rows.len())),
    };
    ctx.log(
        format!(
            "Wide format saved: {} rows, {} columns",
            summary.rows, summary.columns
        ),
        true,
    );
    if let Some((matched, total)) = summary.matched {
        ctx.log(format!("RIS matching: {matched}/{total} PDFs matched"), true);
    }
    Ok(summary)
}
