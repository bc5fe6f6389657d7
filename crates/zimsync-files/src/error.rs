//! Error types for file operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from file metadata, catalog, and chunk IO operations.
#[derive(Debug, Error)]
pub enum FileError {
    /// The requested file does not exist.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// A shared-file name contains path separators or parent references.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for file operations.
pub type Result<T> = std::result::Result<T, FileError>;
