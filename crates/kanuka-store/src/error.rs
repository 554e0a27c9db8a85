//! Error types for the store module.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No registry file in the project.
    #[error("no Kanuka project at {0}")]
    NotInitialized(PathBuf),

    /// Per-username public keys without a registry file.
    #[error("legacy project layout at {0}")]
    LegacyLayout(PathBuf),

    /// A file exists but does not parse or fails validation.
    #[error("corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A file that should exist does not.
    #[error("{what} not found at {path}")]
    NotFound { what: &'static str, path: PathBuf },

    /// Refused to replace an existing file.
    #[error("{what} already exists at {path}")]
    AlreadyExists { what: &'static str, path: PathBuf },

    /// The OS rejected the operation.
    #[error("permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The registry changed on disk after it was loaded.
    #[error("{0} was modified by another process since it was loaded")]
    Conflict(PathBuf),

    /// Key parsing or encoding error.
    #[error("key error: {0}")]
    Key(#[from] kanuka_core::CoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Classify an I/O error, keeping permission failures distinct.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied { path, source },
            _ => StoreError::Io { path, source },
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
