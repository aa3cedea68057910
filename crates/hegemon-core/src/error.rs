//! Error types for the hegemon core library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the hegemon core library.
///
/// Each variant identifies the pipeline stage that failed so a caller can
/// reconstruct the root cause from the error alone.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad caller input, rejected before any side effect
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend unreachable or handshake failed
    #[error("Connection error ({backend}): {message}")]
    Connection { backend: String, message: String },

    /// Credentials rejected by the backend (a kind of connection error)
    #[error("Authentication failed ({backend}): {message}")]
    Authentication { backend: String, message: String },

    /// Backend failed to produce a dump
    #[error("Dump failed ({backend}): {message}")]
    Dump { backend: String, message: String },

    /// Backend failed to apply a dump
    #[error("Restore failed ({backend}): {message}")]
    Restore { backend: String, message: String },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Credential lookup or registration error
    #[error("Credential error: {0}")]
    Credential(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn connection(backend: &str, message: impl Into<String>) -> Self {
        Error::Connection {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn authentication(backend: &str, message: impl Into<String>) -> Self {
        Error::Authentication {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn dump(backend: &str, message: impl Into<String>) -> Self {
        Error::Dump {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn restore(backend: &str, message: impl Into<String>) -> Self {
        Error::Restore {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// True for connection failures, including authentication failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Authentication { .. })
    }

    /// True when the backend rejected the supplied credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Artifact or source file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not enough free space for the artifact plus safety margin
    #[error("Insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },

    /// Metadata ledger could not be read or written
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Filesystem operation failed
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Compression-specific errors
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Format is declared in configuration but has no codec
    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),

    /// Reading the source or writing the destination failed
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compressed input is truncated or undecodable
    #[error("Corrupt or truncated stream in {path}: {message}")]
    CorruptStream { path: PathBuf, message: String },

    /// Pre-flight space check failed
    #[error("Insufficient space for compressed output: estimated {estimated} bytes, {available} bytes available")]
    InsufficientSpace { estimated: u64, available: u64 },

    /// Worker task running the codec failed
    #[error("Codec task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
