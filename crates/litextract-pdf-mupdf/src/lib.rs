use std::path::Path;

use mupdf::{Document, TextPageFlags};

use litextract_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate isolates the mupdf dependency (AGPL-3.0) so the rest of the
/// workspace can be built and tested without it.
///
/// Every page is read in full, one text line per MuPDF line, and pages are
/// joined with a newline. Encrypted or damaged files surface as
/// [`BackendError`]s, which the pipeline treats like a document with no text.
#[derive(Debug, Clone, Default)]
pub struct MupdfBackend {
    /// Stop after this many pages. `None` reads the whole document.
    max_pages: Option<usize>,
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read at most `pages` pages per document. `0` removes the limit.
    pub fn with_page_limit(mut self, pages: usize) -> Self {
        self.max_pages = (pages > 0).then_some(pages);
        self
    }

    pub fn page_limit(&self) -> Option<usize> {
        self.max_pages
    }
}

impl PdfBackend for MupdfBackend {
    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;
        if document
            .needs_password()
            .map_err(|e| BackendError::OpenError(e.to_string()))?
        {
            return Err(BackendError::OpenError("document is password protected".into()));
        }

        let limit = self.max_pages.unwrap_or(usize::MAX);
        let mut pages = Vec::new();
        for page in document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
            .take(limit)
        {
            let page = page.map_err(|e| BackendError::ExtractionError(e.to_string()))?;
            let text_page = page
                .to_text_page(TextPageFlags::empty())
                .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

            let mut lines = Vec::new();
            for block in text_page.blocks() {
                for line in block.lines() {
                    lines.push(
                        line.chars()
                            .map(|c| c.char().unwrap_or('\u{FFFD}'))
                            .collect::<String>(),
                    );
                }
            }
            pages.push(lines);
        }

        tracing::trace!(path = %path.display(), pages = pages.len(), "pdf text extracted");
        Ok(join_pages(pages))
    }
}

/// Lines end with `\n`; pages are separated by one extra `\n`.
fn join_pages(pages: Vec<Vec<String>>) -> String {
    pages
        .into_iter()
        .map(|lines| {
            lines.into_iter().fold(String::new(), |mut page, line| {
                page.push_str(&line);
                page.push('\n');
                page
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_newline_separated() {
        let pages = vec![
            vec!["Title".to_string(), "Abstract".to_string()],
            vec![],
            vec!["Methods".to_string()],
        ];
        assert_eq!(join_pages(pages), "Title\nAbstract\n\n\nMethods\n");
    }

    #[test]
    fn no_pages_is_empty_text() {
        assert_eq!(join_pages(Vec::new()), "");
    }

    #[test]
    fn page_limit_zero_means_unlimited() {
        assert_eq!(MupdfBackend::new().page_limit(), None);
        assert_eq!(MupdfBackend::new().with_page_limit(3).page_limit(), Some(3));
        assert_eq!(MupdfBackend::new().with_page_limit(0).page_limit(), None);
    }

    #[test]
    fn missing_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MupdfBackend::new()
            .extract_text(&dir.path().join("absent.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::OpenError(_)));
    }
}
