//! Which documents a previous run already handled.

use std::collections::HashSet;
use std::path::Path;

use crate::CoreError;
use crate::context::RunContext;
use crate::tabular::read_document_column;

/// Documents present in the temp store, or failing that, in the long table.
///
/// The temp store wins whenever it exists, even if it is empty or unreadable.
/// Neither file existing yields an empty set.
pub fn try_processed_documents(
    temp_store: &Path,
    long_table: &Path,
) -> Result<HashSet<String>, CoreError> {
    let source = if temp_store.exists() {
        temp_store
    } else if long_table.exists() {
        long_table
    } else {
        return Ok(HashSet::new());
    };
    if std::fs::metadata(source)?.len() == 0 {
        return Ok(HashSet::new());
    }
    Ok(read_document_column(source)?.into_iter().collect())
}

/// Like [`try_processed_documents`], but read errors are logged and treated
/// as "nothing processed yet".
pub fn processed_documents(
    temp_store: &Path,
    long_table: &Path,
    ctx: &RunContext,
) -> HashSet<String> {
    match try_processed_documents(temp_store, long_table) {
        Ok(set) => {
            if !set.is_empty() {
                ctx.log(format!("Found {} already processed PDFs", set.len()), true);
            }
            set
        }
        Err(e) => {
            ctx.log(format!("Error reading previous results: {e}"), true);
            HashSet::new()
        }
    }
}
