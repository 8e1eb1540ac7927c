/// Error types for the scanning engine.
///
/// Per-entry failures never surface here; they are skipped where they occur.
/// These types describe failures of a whole target (a directory that cannot
/// be listed), of the task registry, and of configuration loading.
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::TaskTarget;

/// A target-level scan failure.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    /// Path not found (never existed, or removed mid-scan).
    #[error("Path not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The target exists but is not a directory.
    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Create an I/O error with path context, classifying the common kinds.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// `true` when the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by [`crate::registry::TaskRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A task is already running for this target.
    #[error("A task is already running for {target:?}")]
    AlreadyRunning { target: TaskTarget },

    /// The OS refused to spawn a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors raised while loading a [`crate::config::ScanConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
