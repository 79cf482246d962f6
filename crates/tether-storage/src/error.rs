//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An object id could not be parsed.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// An object could not be parsed or failed validation.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// The requested object is not present.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A reference name or value is malformed.
    #[error("invalid reference: {0}")]
    InvalidRef(String),

    /// Symbolic references nest deeper than the store follows.
    #[error("symbolic reference chain too deep at {0}")]
    SymrefDepth(String),

    /// Object data could not be compressed or decompressed.
    #[error("compression error: {0}")]
    Compression(String),

    /// The repository configuration file is malformed.
    #[error("invalid config at line {line}: {message}")]
    Config {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
}
