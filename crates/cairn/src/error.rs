//! Error types for Cairn operations.
//!
//! Two layers:
//!
//! - [`Error`] ends the call that produced it: a broken database, an unknown
//!   workspace, a second reindex of a busy workspace, a root that does not
//!   belong to the workspace.
//! - [`IndexError`] describes one file. A reindex pass collects these in its
//!   report and keeps going with the remaining files.
//!
//! [`IndexErrorKind`] separates problems with the source tree (syntax errors,
//! bad encodings, edges into another workspace) from problems on Cairn's side
//! (I/O, store writes, embeddings). Only embedding failures leave a file
//! partially indexed; every other kind means nothing of that file was written.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for Cairn operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Cairn operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tree-sitter parsing infrastructure failed
    #[error("parser error: {0}")]
    Parser(String),

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested entity, file, or workspace does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal error (mutex poisoned, worker pool failure, etc.)
    #[error("internal error: {0}")]
    Internal(String),

    /// An operation tried to mix data from two workspaces
    #[error("context mismatch: expected workspace '{expected}', found '{found}'")]
    ContextMismatch {
        /// Namespace the operation is bound to
        expected: String,
        /// Namespace that was actually encountered
        found: String,
    },

    /// A reindex of this workspace is already running
    #[error("a reindex of workspace '{0}' is already in progress")]
    ConcurrentReindex(String),

    /// Writing one file's data to the stores failed after retries
    #[error("store write failed for {}: {message}", path.display())]
    StoreWrite {
        /// File whose write failed
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// The embedding service failed
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl Error {
    /// Returns `true` for `SQLite` failures worth retrying (busy or locked database).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Error encountered while indexing a specific file.
///
/// These errors are collected during a reindex pass but don't halt it.
/// The coordinator continues with remaining files and reports all errors at the end.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexError {
    /// Path to the file that failed (relative to the workspace root)
    pub path: PathBuf,
    /// Category of the error
    pub kind: IndexErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.path.display(),
            self.message,
            self.kind
        )
    }
}

impl std::error::Error for IndexError {}

/// Categorization of indexing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexErrorKind {
    // === Input Problems (analogous to HTTP 4xx) ===
    /// Source file has syntax errors that prevent extraction
    ParseFailed,

    /// File type is not supported (unknown extension)
    UnsupportedLanguage,

    /// File content is not valid UTF-8
    EncodingError,

    /// A relationship would have connected entities of two workspaces
    ContextMismatch,

    // === Internal Problems (analogous to HTTP 5xx) ===
    /// Could not read the file from disk
    IoError,

    /// Graph store write failed for this file
    StoreWriteFailed,

    /// Embedding or vector write failed for one entity (graph data was kept)
    EmbeddingFailed,
}

impl std::fmt::Display for IndexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseFailed => write!(f, "parse failed"),
            Self::UnsupportedLanguage => write!(f, "unsupported language"),
            Self::EncodingError => write!(f, "encoding error"),
            Self::ContextMismatch => write!(f, "context mismatch"),
            Self::IoError => write!(f, "I/O error"),
            Self::StoreWriteFailed => write!(f, "store write failed"),
            Self::EmbeddingFailed => write!(f, "embedding failed"),
        }
    }
}

impl IndexErrorKind {
    /// Returns `true` if this is an input problem (4xx-style).
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ParseFailed
                | Self::UnsupportedLanguage
                | Self::EncodingError
                | Self::ContextMismatch
        )
    }

    /// Returns `true` if this is an internal problem (5xx-style).
    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        matches!(
            self,
            Self::IoError | Self::StoreWriteFailed | Self::EmbeddingFailed
        )
    }

    /// Returns `true` if the file still counts as indexed despite this error.
    ///
    /// Embedding failures leave the file's graph data in place.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::EmbeddingFailed)
    }
}

impl IndexError {
    /// Create a new indexing error.
    #[must_use]
    pub fn new(path: PathBuf, kind: IndexErrorKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }

    /// Create a parse error for a file.
    #[must_use]
    pub fn parse_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(path, IndexErrorKind::ParseFailed, message)
    }

    /// Create an unsupported language error.
    #[must_use]
    pub fn unsupported_language(path: PathBuf) -> Self {
        let ext = path
            .extension()
            .map_or_else(|| "none".to_string(), |e| e.to_string_lossy().to_string());
        Self::new(
            path,
            IndexErrorKind::UnsupportedLanguage,
            format!("unsupported extension: {ext}"),
        )
    }

    /// Create an encoding error for a file.
    #[must_use]
    pub fn encoding_error(path: PathBuf) -> Self {
        Self::new(
            path,
            IndexErrorKind::EncodingError,
            "file is not valid UTF-8",
        )
    }

    /// Create an I/O error for a file.
    #[must_use]
    pub fn io_error(path: PathBuf, error: &std::io::Error) -> Self {
        Self::new(path, IndexErrorKind::IoError, error.to_string())
    }

    /// Create a store write error for a file.
    #[must_use]
    pub fn store_write_failed(path: PathBuf, error: &Error) -> Self {
        Self::new(path, IndexErrorKind::StoreWriteFailed, error.to_string())
    }
}
