//! Error types for caskstore
//!
//! Provides a unified error type for all store operations, plus the
//! decode outcome used while replaying segment files.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for caskstore operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Locking Errors
    // -------------------------------------------------------------------------
    /// Another process (or another store instance) owns the directory
    #[error("Store directory is locked by another owner: {}", .0.display())]
    LockHeld(PathBuf),

    // -------------------------------------------------------------------------
    // Append Errors
    // -------------------------------------------------------------------------
    /// Optimistic concurrency check failed; nothing was written
    #[error("Concurrency conflict: expected version {expected}, actual version {actual}")]
    ConcurrencyConflict { expected: u32, actual: u32 },

    /// The record cannot be represented in the on-disk format; closes the store
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskError {
    /// Whether the store stays usable after this error
    ///
    /// Everything else returned from `append` has already closed the store.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaskError::ConcurrencyConflict { .. })
    }
}

/// Outcome of a failed record decode
///
/// `Truncated` and `Malformed` are consumed by replay and never surface
/// through the store API.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// End of data exactly on a field boundary
    #[error("end of segment")]
    Truncated,

    /// Partial or corrupt record
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
