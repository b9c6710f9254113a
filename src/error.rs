//! Error types for DriftKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using DriftError
pub type Result<T> = std::result::Result<T, DriftError>;

/// Unified error type for DriftKV operations
#[derive(Debug, Error)]
pub enum DriftError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// File create/open/read/write/delete/move failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    /// A cache snapshot could not be parsed; the index cannot be trusted
    #[error("Corrupt index snapshot {}: {reason}", path.display())]
    CorruptSnapshot { path: PathBuf, reason: String },

    /// Internal consistency check failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// Key or value cannot be framed in the log format
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriftError {
    /// Shorthand for building an [`DriftError::InvariantViolation`]
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        DriftError::InvariantViolation(msg.into())
    }
}
