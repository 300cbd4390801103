//! Matching document paths against the filename keys of a [`BibIndex`].
//!
//! Strategies run in a fixed order and the first hit wins. The final
//! substring strategy trades precision for recall: two unrelated files whose
//! names share a long common run will match each other. The minimum length
//! guard keeps short names like `1.pdf` or `paper.pdf` from matching anything.

use crate::{BibEntry, BibIndex};

/// Shorter of the two extension-stripped names must be longer than this for
/// the substring strategy to accept a match.
pub const MIN_SUBSTRING_MATCH_LEN: usize = 5;

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The document's file name is a key.
    Basename,
    /// The full relative path is a key.
    FullPath,
    /// File names agree after case folding and dropping spaces, `_` and `-`.
    Normalized,
    /// A key contains the document's parent folder name (attachment id).
    ParentFolder,
    /// One extension-stripped name contains the other.
    Substring,
}

impl BibIndex {
    /// Find the bibliographic entry for a document path.
    pub fn find(&self, document: &str) -> Option<&BibEntry> {
        self.find_with_strategy(document).map(|(_, entry)| entry)
    }

    /// Find the entry for a document path along with the strategy that hit.
    pub fn find_with_strategy(&self, document: &str) -> Option<(MatchStrategy, &BibEntry)> {
        let path = document.replace('\\', "/");
        let file_name = base_name(&path);

        if let Some(entry) = self.get(file_name) {
            return Some((MatchStrategy::Basename, entry));
        }

        if let Some(entry) = self.get(document).or_else(|| self.get(&path)) {
            return Some((MatchStrategy::FullPath, entry));
        }

        let normalized = normalize_name(file_name);
        if let Some((_, entry)) = self
            .iter()
            .find(|(key, _)| normalize_name(base_name(key)) == normalized)
        {
            return Some((MatchStrategy::Normalized, entry));
        }

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() >= 2 {
            let parent = segments[segments.len() - 2];
            if !parent.is_empty()
                && let Some((_, entry)) = self.iter().find(|(key, _)| key.contains(parent))
            {
                return Some((MatchStrategy::ParentFolder, entry));
            }
        }

        let stem = file_stem(file_name).to_lowercase();
        self.iter()
            .find(|(key, _)| {
                let key_stem = file_stem(base_name(key)).to_lowercase();
                let shorter = stem.chars().count().min(key_stem.chars().count());
                shorter > MIN_SUBSTRING_MATCH_LEN
                    && (stem.contains(&key_stem) || key_stem.contains(&stem))
            })
            .map(|(_, entry)| (MatchStrategy::Substring, entry))
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Strip the final extension, leaving dotfiles like `.pdf` intact.
fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}
