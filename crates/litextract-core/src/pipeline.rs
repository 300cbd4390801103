//! One complete extraction run, from question bank to wide table.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use litextract_ris::{BibIndex, parse_ris_file};

use crate::aggregate::aggregate_file;
use crate::backend::PdfBackend;
use crate::client::ExtractionClient;
use crate::context::{Failure, RunContext};
use crate::documents::find_documents;
use crate::questions::load_questions;
use crate::resume::processed_documents;
use crate::scheduler::{DocumentProcessor, make_batches, run_batches};
use crate::tabular::{read_long_table, write_long_table};
use crate::writer::ResultWriter;
use crate::{Config, CoreError};

pub const TEMP_FILE_NAME: &str = "Results_Temp.csv";
pub const LONG_FILE_NAME: &str = "Results_Long.csv";
pub const WIDE_FILE_NAME: &str = "Results_Wide.csv";
pub const LOG_FILE_NAME: &str = "processing_log.txt";

const RULE: &str = "============================================================";

/// Where the inputs of a run live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub pdf_folder: PathBuf,
    pub questions_file: PathBuf,
    pub ris_file: Option<PathBuf>,
    pub output_folder: PathBuf,
}

/// Files a run reads and writes in its output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub temp: PathBuf,
    pub long: PathBuf,
    pub wide: PathBuf,
    pub log: PathBuf,
}

impl OutputPaths {
    pub fn in_folder(folder: &Path) -> Self {
        Self {
            temp: folder.join(TEMP_FILE_NAME),
            long: folder.join(LONG_FILE_NAME),
            wide: folder.join(WIDE_FILE_NAME),
            log: folder.join(LOG_FILE_NAME),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Documents skipped because an earlier run already handled them.
    pub previously_processed: usize,
    pub completed: usize,
    pub total: usize,
    pub failures: Vec<Failure>,
    /// Cancelled before every scheduled document finished.
    pub stopped: bool,
    /// Rows in the long table after promotion, if it was (re)written.
    pub long_rows: Option<usize>,
    /// Rows in the wide table, if aggregation succeeded.
    pub wide_rows: Option<usize>,
}

impl RunReport {
    pub fn successful(&self) -> usize {
        self.completed.saturating_sub(self.failures.len())
    }
}

/// Run the whole pipeline.
///
/// Configuration problems (invalid parameters, no questions, no documents)
/// are returned as errors before any request is made. Everything after that
/// is reported through `ctx` and the returned [`RunReport`].
pub async fn run_pipeline(
    inputs: &RunInputs,
    config: &Config,
    client: Arc<dyn ExtractionClient>,
    backend: Arc<dyn PdfBackend>,
    ctx: Arc<RunContext>,
) -> Result<RunReport, CoreError> {
    config.validate()?;
    std::fs::create_dir_all(&inputs.output_folder)?;
    let paths = OutputPaths::in_folder(&inputs.output_folder);

    ctx.log("=== Starting Processing ===", true);

    let bank = load_questions(&inputs.questions_file, &ctx);
    if bank.is_empty() {
        ctx.log("ERROR: No questions found!", true);
        return Err(CoreError::Config("No questions found".into()));
    }

    let index = load_bib_index(inputs.ris_file.as_deref(), &ctx);

    let all_documents = find_documents(&inputs.pdf_folder)?;
    ctx.log(format!("Found {} PDF files", all_documents.len()), true);
    if all_documents.is_empty() {
        ctx.log("ERROR: No PDF files found!", true);
        return Err(CoreError::Config("No PDF files found".into()));
    }

    let processed = processed_documents(&paths.temp, &paths.long, &ctx);
    let mut report = RunReport {
        previously_processed: processed.len(),
        ..Default::default()
    };
    let remaining = if processed.is_empty() {
        all_documents
    } else {
        ctx.log(
            format!("RESUME MODE: {} PDFs already processed", processed.len()),
            true,
        );
        let remaining = remaining_documents(all_documents, &processed);
        ctx.log(format!("Remaining PDFs to process: {}", remaining.len()), true);
        if remaining.is_empty() {
            ctx.log("All PDFs already processed!", true);
            report.long_rows = promote_logged(&paths, &ctx);
            report.wide_rows = aggregate_logged(&paths, &index, &ctx);
            return Ok(report);
        }
        remaining
    };

    let selected = match config.sample_size {
        Some(n) => {
            let sample = sample_documents(remaining, n);
            ctx.log(
                format!("TEST MODE: Processing {} random PDFs", sample.len()),
                true,
            );
            sample
        }
        None => {
            ctx.log(
                format!("FULL MODE: Processing all {} PDFs", remaining.len()),
                true,
            );
            remaining
        }
    };

    let total = selected.len();
    let batches = make_batches(selected, config.max_workers);
    ctx.log(format!("Split into {} batches", batches.len()), true);
    ctx.begin(total);

    let processor = DocumentProcessor::new(
        &inputs.pdf_folder,
        Arc::new(bank),
        client,
        backend,
        ResultWriter::new(&paths.temp),
        config,
    );
    run_batches(batches, Arc::new(processor), Arc::clone(&ctx)).await;

    let state = ctx.snapshot();
    report.completed = state.completed;
    report.total = state.total;
    report.failures = state.failed;

    if ctx.is_cancelled() {
        ctx.log("Processing stopped by user", true);
        report.stopped = true;
        return Ok(report);
    }

    report.long_rows = promote_logged(&paths, &ctx);
    log_summary(&report, &ctx);
    report.wide_rows = aggregate_logged(&paths, &index, &ctx);

    ctx.log("Processing complete!", true);
    Ok(report)
}

/// Parse the RIS export at `path`. Missing or unreadable files give an
/// empty index.
pub fn load_bib_index(path: Option<&Path>, ctx: &RunContext) -> BibIndex {
    let Some(path) = path else {
        return BibIndex::default();
    };
    if !path.exists() {
        ctx.log(format!("RIS file not found: {}", path.display()), true);
        return BibIndex::default();
    }
    match parse_ris_file(path) {
        Ok(index) => {
            ctx.log(
                format!("Parsed {} PDF entries from RIS file", index.len()),
                true,
            );
            index
        }
        Err(e) => {
            ctx.log(format!("Error parsing RIS file: {e}"), true);
            BibIndex::default()
        }
    }
}

fn remaining_documents(documents: Vec<String>, processed: &HashSet<String>) -> Vec<String> {
    documents
        .into_iter()
        .filter(|d| !processed.contains(d))
        .collect()
}

/// A uniformly random subset of `n` documents, or all of them if fewer.
pub fn sample_documents(mut documents: Vec<String>, n: usize) -> Vec<String> {
    if documents.len() > n {
        fastrand::shuffle(&mut documents);
        documents.truncate(n);
    }
    documents
}

/// Fold the temp store into the long table and delete it.
///
/// Long-table rows stay as they are; temp row groups are appended only for
/// documents the long table does not already contain. Returns the long
/// table's row count, or `None` when there was no temp store.
pub fn promote_temp_store(temp: &Path, long: &Path) -> Result<Option<usize>, CoreError> {
    if !temp.exists() {
        return Ok(None);
    }
    let mut rows = if long.exists() {
        read_long_table(long)?
    } else {
        Vec::new()
    };
    let present: HashSet<String> = rows.iter().map(|r| r.document.clone()).collect();
    let fresh = read_long_table(temp)?
        .into_iter()
        .filter(|r| !present.contains(&r.document));
    rows.extend(fresh);

    write_long_table(long, &rows)?;
    std::fs::remove_file(temp)?;
    tracing::debug!(rows = rows.len(), long = %long.display(), "promoted temp store");
    Ok(Some(rows.len()))
}

fn promote_logged(paths: &OutputPaths, ctx: &RunContext) -> Option<usize> {
    match promote_temp_store(&paths.temp, &paths.long) {
        Ok(Some(rows)) => {
            ctx.log(format!("Long format: {rows} rows"), true);
            Some(rows)
        }
        Ok(None) => None,
        Err(e) => {
            ctx.log(format!("Error writing long format: {e}"), true);
            None
        }
    }
}

fn aggregate_logged(paths: &OutputPaths, index: &BibIndex, ctx: &RunContext) -> Option<usize> {
    if !paths.long.exists() {
        return None;
    }
    match aggregate_file(&paths.long, &paths.wide, index, ctx) {
        Ok(summary) => Some(summary.rows),
        Err(e) => {
            ctx.log(format!("Error converting to wide format: {e}"), true);
            None
        }
    }
}

/// The summary block is routine: front ends render their own from the
/// returned [`RunReport`].
fn log_summary(report: &RunReport, ctx: &RunContext) {
    ctx.log(RULE, false);
    ctx.log("SUMMARY:", false);
    if report.previously_processed > 0 {
        ctx.log(
            format!("Previously processed: {} PDFs", report.previously_processed),
            false,
        );
        ctx.log(
            format!("Newly processed: {}/{}", report.completed, report.total),
            false,
        );
    } else {
        ctx.log(
            format!("Total processed: {}/{}", report.completed, report.total),
            false,
        );
    }
    ctx.log(format!("Successful: {}", report.successful()), false);
    ctx.log(format!("Failed: {}", report.failures.len()), false);
    for failure in &report.failures {
        ctx.log(format!("  - {failure}"), false);
    }
    ctx.log(RULE, false);
}
