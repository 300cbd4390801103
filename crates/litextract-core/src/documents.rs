use std::path::{Component, Path};

use walkdir::WalkDir;

use crate::CoreError;

/// Files ending in this extension (any case) are documents.
pub const DOCUMENT_EXTENSION: &str = ".pdf";

pub fn is_document_name(name: &str) -> bool {
    name.to_lowercase().ends_with(DOCUMENT_EXTENSION)
}

/// Recursively list documents under `root` as `/`-separated relative paths.
///
/// Entries are visited in file-name order so the result is stable for a
/// given tree. Unreadable subdirectories are skipped with a warning.
pub fn find_documents(root: &Path) -> Result<Vec<String>, CoreError> {
    if !root.is_dir() {
        return Err(CoreError::Config(format!(
            "PDF folder not found: {}",
            root.display()
        )));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_document_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            documents.push(document_id(relative));
        }
    }

    tracing::debug!(root = %root.display(), count = documents.len(), "enumerated documents");
    Ok(documents)
}

/// Render a relative path with `/` separators regardless of platform.
pub fn document_id(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"%PDF-1.4").unwrap();
    }

    #[test]
    fn finds_nested_pdfs_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.pdf");
        touch(dir.path(), "files/12345/Smith_2020.PDF");
        touch(dir.path(), "files/12345/notes.txt");
        touch(dir.path(), "deep/er/still/x.Pdf");

        let mut docs = find_documents(dir.path()).unwrap();
        docs.sort();
        assert_eq!(
            docs,
            vec!["a.pdf", "deep/er/still/x.Pdf", "files/12345/Smith_2020.PDF"]
        );
    }

    #[test]
    fn directories_named_like_pdfs_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("folder.pdf")).unwrap();
        touch(dir.path(), "folder.pdf/inner.pdf");
        let docs = find_documents(dir.path()).unwrap();
        assert_eq!(docs, vec!["folder.pdf/inner.pdf"]);
    }

    #[test]
    fn stable_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.pdf", "a.pdf", "b/z.pdf", "b/a.pdf"] {
            touch(dir.path(), name);
        }
        assert_eq!(
            find_documents(dir.path()).unwrap(),
            find_documents(dir.path()).unwrap()
        );
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_documents(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_documents(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
