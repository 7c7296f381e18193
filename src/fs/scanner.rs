//! Per-source directory scanner
//!
//! Walks one source root depth-first and emits a flat list of regular
//! files with size and mtime. Excluded paths (exact absolute match) are
//! pruned at both directory and file granularity, symlinks are skipped
//! entirely, and per-entry filesystem errors are logged without aborting
//! the walk. Only a root that cannot be opened ends the scan for that
//! source.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// One regular file observed during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Absolute path of the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime_ns: u64,
}

/// Directory scanner with an exclusion list
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    excludes: Vec<PathBuf>,
}

impl Scanner {
    /// Create a scanner excluding the given absolute paths.
    pub fn new(excludes: Vec<PathBuf>) -> Self {
        Self { excludes }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|e| e == path)
    }

    /// Scan `root`, which may be a directory or a single file.
    ///
    /// Returns the files found; an unreadable root yields an empty list
    /// (fatal for this source only, the error is logged).
    pub fn scan(&self, root: &Path) -> Vec<ScannedFile> {
        if !root.exists() {
            tracing::error!("scan: path does not exist: {}", root.display());
            return Vec::new();
        }
        if self.is_excluded(root) {
            tracing::info!("skipping excluded root: {}", root.display());
            return Vec::new();
        }

        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.path_is_symlink() {
                    tracing::debug!("skipping symlink: {}", entry.path().display());
                    return false;
                }
                if self.is_excluded(entry.path()) {
                    tracing::info!("skipping excluded path: {}", entry.path().display());
                    return false;
                }
                true
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::error!("filesystem error during scan: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::error!(
                        "cannot read metadata for {}: {err}",
                        entry.path().display()
                    );
                    continue;
                }
            };

            let mtime_ns = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);

            files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                mtime_ns,
            });
        }

        tracing::info!("scanned {} files under {}", files.len(), root.display());
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_scan_nested_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.txt"), b"aa");
        touch(&dir.path().join("sub/b.txt"), b"bbb");
        touch(&dir.path().join("sub/deep/c.txt"), b"c");

        let files = Scanner::default().scan(dir.path());
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.path.is_absolute()));

        let b = files
            .iter()
            .find(|f| f.path.ends_with("sub/b.txt"))
            .unwrap();
        assert_eq!(b.size, 3);
        assert!(b.mtime_ns > 0);
    }

    #[test]
    fn test_scan_single_file_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("only.txt");
        touch(&file, b"data");

        let files = Scanner::default().scan(&file);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, file);
    }

    #[test]
    fn test_excluded_directory_is_pruned() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("keep.txt"), b"k");
        touch(&dir.path().join("skip/inside.txt"), b"i");

        let scanner = Scanner::new(vec![dir.path().join("skip")]);
        let files = scanner.scan(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("keep.txt"));
    }

    #[test]
    fn test_excluded_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("keep.txt"), b"k");
        touch(&dir.path().join("drop.txt"), b"d");

        let scanner = Scanner::new(vec![dir.path().join("drop.txt")]);
        let files = scanner.scan(dir.path());
        assert_eq!(files.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("real.txt"), b"r");
        std::os::unix::fs::symlink(
            dir.path().join("real.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();

        let files = Scanner::default().scan(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("real.txt"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(Scanner::default().scan(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("never");
        assert!(Scanner::default().scan(&gone).is_empty());
    }
}
