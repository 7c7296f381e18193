//! Error types for MirrorSync
//!
//! This module defines all error types used throughout the application,
//! providing detailed error information for debugging and user feedback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for MirrorSync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File or directory not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persisted cache file contains malformed data
    #[error("Corrupt cache file '{path}': {detail}")]
    CacheFormat { path: PathBuf, detail: String },

    /// The destination cache directory is incomplete and cannot be restored
    #[error("Cache integrity failure: {0}")]
    CacheCorrupt(String),

    /// Failure recovery could not complete
    #[error("Recovery error: {0}")]
    Recovery(String),

    /// Thread pool construction or submission error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl SyncError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a cache-format error
    pub fn cache_format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CacheFormat {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Check if this error is a permission issue
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::CacheFormat { path, .. } | Self::NotFound(path) => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Result type alias for MirrorSync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SyncError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SyncError::io("/test/path", io_err);
        assert!(err.path().is_some());
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
    }

    #[test]
    fn test_permission_detection() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SyncError::io("/test", io_err);
        assert!(err.is_permission_error());

        assert!(!SyncError::config("bad key").is_permission_error());
    }

    #[test]
    fn test_with_path_ext() {
        let result: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = result.with_path("/some/file").unwrap_err();
        assert_eq!(err.path().unwrap(), &PathBuf::from("/some/file"));
    }
}
