//! File filtering logic for the scanner.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Decides which files and directories the walk visits
#[derive(Debug, Clone)]
pub struct ImageFilter {
    /// Lowercase extensions to include
    extensions: BTreeSet<String>,
    include_hidden: bool,
    /// Directories pruned with everything below them
    excluded: Vec<PathBuf>,
}

impl ImageFilter {
    pub fn new(extensions: BTreeSet<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            include_hidden: false,
            excluded: Vec::new(),
        }
    }

    /// Include hidden files and directories (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Skip a directory subtree
    pub fn with_excluded(mut self, dir: PathBuf) -> Self {
        self.excluded.push(dir);
        self
    }

    fn is_hidden(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with('.'))
    }

    /// Whether to descend into a directory below the root
    pub fn should_enter(&self, dir: &Path) -> bool {
        if !self.include_hidden && Self::is_hidden(dir) {
            return false;
        }
        !self.excluded.iter().any(|ex| dir.starts_with(ex))
    }

    /// Check if a file should be included
    pub fn should_include(&self, path: &Path) -> bool {
        if !self.include_hidden && Self::is_hidden(path) {
            return false;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }
}
