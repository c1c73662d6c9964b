//! Error types for the hermod-spool crate.

use std::io;

use thiserror::Error;

use crate::SpooledMessageId;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Message not found in spool.
    #[error("Message not found: {0}")]
    NotFound(SpooledMessageId),

    /// Spool configuration or directory validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Encoding and decoding errors for spool records.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("RON encode error: {0}")]
    Encode(#[from] ron::Error),

    #[error("RON decode error: {0}")]
    Decode(#[from] ron::error::SpannedError),

    /// The record was written by a format this build does not understand.
    #[error("Unsupported spool record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Spool path and directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Spool path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Invalid spool configuration: {0}")]
    InvalidConfiguration(String),
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
