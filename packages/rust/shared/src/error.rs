//! Error types for ecotax.
//!
//! Library crates use [`EcotaxError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ecotax operations.
#[derive(Debug, thiserror::Error)]
pub enum EcotaxError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// Source record or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Relational metadata store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding service failure (transport, status, response shape).
    #[error("embedding service error: {0}")]
    Embedding(String),

    /// Vector store failure.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Monitoring sink failure.
    #[error("monitoring error: {0}")]
    Monitoring(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A source file whose extension no parser understands.
    #[error("unsupported source format {extension:?} for {path:?}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The embedding service returned a different number of vectors than inputs.
    #[error("embedding count mismatch in batch {batch}: expected {expected}, got {actual}")]
    EmbeddingCountMismatch {
        batch: usize,
        expected: usize,
        actual: usize,
    },

    /// One or more vectors in a batch had the wrong length.
    #[error(
        "embedding dimension mismatch in batch {batch}: expected {expected}, offending indices {offending:?}"
    )]
    EmbeddingDimensionMismatch {
        batch: usize,
        expected: usize,
        offending: Vec<usize>,
    },

    /// The vector store holds no embeddings for the requested chunk type.
    #[error("no embeddings available for chunk type {chunk_type:?}")]
    NoEmbeddingsAvailable { chunk_type: String },

    /// A stage's required input (a previous stage's output) is missing.
    #[error("stage {stage} requires {path:?}, which does not exist")]
    MissingStageOutput { stage: String, path: PathBuf },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EcotaxError>;

impl EcotaxError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
