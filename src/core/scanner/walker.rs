//! Directory walking implementation using walkdir.

use super::{filter::ImageFilter, FileSnapshot, ScanOutcome};
use crate::core::cancel::CancellationToken;
use crate::core::config::SorterConfig;
use crate::core::record::FileStamp;
use crate::error::ScanError;
use crate::events::{Event, EventSender, ScanEvent};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Traversal options
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub follow_symlinks: bool,
    /// Maximum directory depth below the root (None = unlimited)
    pub max_depth: Option<usize>,
    pub filter: ImageFilter,
}

impl ScanOptions {
    /// Options for a run. The quarantine folder is never scanned, so
    /// quarantined duplicates do not come back as new records.
    pub fn from_config(config: &SorterConfig) -> Self {
        let quarantine = config
            .policy
            .quarantine_root
            .canonicalize()
            .unwrap_or_else(|_| config.policy.quarantine_root.clone());
        Self {
            follow_symlinks: config.follow_symlinks,
            max_depth: config.max_depth,
            filter: ImageFilter::new(config.extensions.clone())
                .with_hidden(config.include_hidden)
                .with_excluded(quarantine),
        }
    }
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    options: ScanOptions,
}

impl WalkDirScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Walk `root` and stat every matching file.
    ///
    /// Per-entry failures are collected and reported, never fatal. The
    /// token is checked before each entry; a cancelled walk returns
    /// `ScanError::Cancelled` and nothing else.
    pub fn scan(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<ScanOutcome, ScanError> {
        let root = canonical_root(root)?;
        events.send(Event::Scan(ScanEvent::Started { root: root.clone() }));

        let mut files = Vec::new();
        let mut errors = Vec::new();

        let mut walker = WalkDir::new(&root).follow_links(self.options.follow_symlinks);
        if let Some(depth) = self.options.max_depth {
            // Depth counts directories below the root; files sit one deeper
            walker = walker.max_depth(depth.saturating_add(1));
        }

        let filter = &self.options.filter;
        let entries = walker.into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_type().is_dir() || filter.should_enter(entry.path())
        });

        for entry_result in entries {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    let error = if e.io_error().map(|e| e.kind())
                        == Some(std::io::ErrorKind::PermissionDenied)
                    {
                        ScanError::PermissionDenied { path: path.clone() }
                    } else {
                        ScanError::ReadDirectory {
                            path: path.clone(),
                            source: std::io::Error::other(e.to_string()),
                        }
                    };
                    report(events, &path, &error);
                    errors.push(error);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                events.send(Event::Scan(ScanEvent::Directory {
                    path: path.to_path_buf(),
                    files_found: files.len(),
                }));
                continue;
            }

            if !filter.should_include(path) {
                continue;
            }

            match fs::metadata(path) {
                Ok(metadata) if metadata.is_file() => files.push(FileSnapshot {
                    path: path.to_path_buf(),
                    stamp: FileStamp::from_metadata(&metadata),
                }),
                Ok(_) => {}
                Err(e) => {
                    let error = ScanError::ReadDirectory {
                        path: path.to_path_buf(),
                        source: e,
                    };
                    report(events, path, &error);
                    errors.push(error);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!(
            root = %root.display(),
            files = files.len(),
            errors = errors.len(),
            "Traversal complete"
        );

        Ok(ScanOutcome {
            root,
            files,
            errors,
        })
    }
}

fn report(events: &EventSender, path: &Path, error: &ScanError) {
    tracing::warn!(path = %path.display(), "{}", error);
    events.send(Event::Scan(ScanEvent::Error {
        path: path.to_path_buf(),
        message: error.to_string(),
    }));
}

/// Absolute, symlink-free form of a root directory
pub fn canonical_root(root: &Path) -> Result<PathBuf, ScanError> {
    let canonical = root.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied {
            path: root.to_path_buf(),
        },
        _ => ScanError::DirectoryNotFound {
            path: root.to_path_buf(),
        },
    })?;
    if !canonical.is_dir() {
        return Err(ScanError::DirectoryNotFound {
            path: root.to_path_buf(),
        });
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::default_extensions;
    use crate::events::{null_sender, EventChannel};
    use tempfile::TempDir;

    fn options() -> ScanOptions {
        ScanOptions {
            follow_symlinks: false,
            max_depth: None,
            filter: ImageFilter::new(default_extensions()),
        }
    }

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    }

    fn names(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .files
            .iter()
            .map(|f| {
                f.path
                    .strip_prefix(&outcome.root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn scan_empty_directory_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let outcome = WalkDirScanner::new(options())
            .scan(dir.path(), &CancellationToken::new(), &null_sender())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn finds_nested_images_in_path_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "a/c.png");
        touch(dir.path(), "a/notes.txt");
        touch(dir.path(), "a.JPG");

        let outcome = WalkDirScanner::new(options())
            .scan(dir.path(), &CancellationToken::new(), &null_sender())
            .unwrap();
        // Paths order component-wise: the directory "a" sorts before "a.JPG"
        assert_eq!(names(&outcome), vec!["a/c.png", "a.JPG", "b.jpg"]);
        assert!(outcome.files.iter().all(|f| f.path.is_absolute()));
        assert_eq!(outcome.files[0].stamp.size, 4);
    }

    #[test]
    fn max_depth_limits_directories() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "top.jpg");
        touch(dir.path(), "one/mid.jpg");
        touch(dir.path(), "one/two/deep.jpg");

        let mut opts = options();
        opts.max_depth = Some(0);
        let outcome = WalkDirScanner::new(opts.clone())
            .scan(dir.path(), &CancellationToken::new(), &null_sender())
            .unwrap();
        assert_eq!(names(&outcome), vec!["top.jpg"]);

        opts.max_depth = Some(1);
        let outcome = WalkDirScanner::new(opts)
            .scan(dir.path(), &CancellationToken::new(), &null_sender())
            .unwrap();
        assert_eq!(names(&outcome), vec!["one/mid.jpg", "top.jpg"]);
    }

    #[test]
    fn hidden_and_excluded_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".cache/thumb.jpg");
        touch(dir.path(), "dupes/x/old.jpg");
        touch(dir.path(), "keep.jpg");
        let root = dir.path().canonicalize().unwrap();

        let mut opts = options();
        opts.filter = opts.filter.with_excluded(root.join("dupes"));
        let outcome = WalkDirScanner::new(opts)
            .scan(dir.path(), &CancellationToken::new(), &null_sender())
            .unwrap();
        assert_eq!(names(&outcome), vec!["keep.jpg"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = WalkDirScanner::new(options()).scan(
            Path::new("/nonexistent/photos"),
            &CancellationToken::new(),
            &null_sender(),
        );
        assert!(matches!(result, Err(ScanError::DirectoryNotFound { .. })));
    }

    #[test]
    fn cancelled_token_stops_the_walk() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg");
        let token = CancellationToken::new();
        token.cancel();

        let result = WalkDirScanner::new(options()).scan(dir.path(), &token, &null_sender());
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn emits_start_and_directory_events() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub/a.jpg");
        let (sender, receiver) = EventChannel::new();

        WalkDirScanner::new(options())
            .scan(dir.path(), &CancellationToken::new(), &sender)
            .unwrap();

        let events: Vec<Event> = receiver.drain();
        assert!(matches!(events[0], Event::Scan(ScanEvent::Started { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Scan(ScanEvent::Directory { .. }))));
    }
}
