use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Turns a PDF on disk into plain text.
///
/// Extraction is synchronous and CPU-bound; async callers go through
/// [`extract_text_blocking`].
pub trait PdfBackend: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, BackendError>;
}

/// Run `backend.extract_text` on the blocking thread pool.
pub async fn extract_text_blocking(
    backend: Arc<dyn PdfBackend>,
    path: PathBuf,
) -> Result<String, BackendError> {
    tokio::task::spawn_blocking(move || backend.extract_text(&path))
        .await
        .map_err(|e| BackendError::Aborted(e.to_string()))?
}
