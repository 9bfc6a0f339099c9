//! Error types for the ruamail-spool crate.
//!
//! This module provides typed error handling for store operations including
//! file I/O, serialization, and validation.

use std::io;

use ruamail_common::ReportId;
use thiserror::Error;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A report could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Report not found in the store.
    #[error("Report not found: {0}")]
    NotFound(ReportId),

    /// Report already queued under this identifier.
    #[error("Report already exists: {0}")]
    AlreadyExists(ReportId),

    /// Spool directory or report identifier validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, capacity, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Spool directory and identifier validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spool path contains a `..` component.
    #[error("Spool path cannot contain '..' components: {0}")]
    ParentComponent(String),

    /// Spool path is relative.
    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    /// Spool path points into a system directory.
    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    /// Spool path exists but is not a directory.
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    /// Identifier cannot be used as a file name.
    #[error("Invalid report id {0:?}")]
    InvalidId(String),
}

impl From<ron::error::SpannedError> for SpoolError {
    fn from(e: ron::error::SpannedError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<ron::Error> for SpoolError {
    fn from(e: ron::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
