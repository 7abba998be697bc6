//! Error types for run reports

use thiserror::Error;

/// Main error type for run report operations
#[derive(Error, Debug)]
pub enum ReportError {
    /// Persisted report could not be reconstructed (bad JSON, missing fields,
    /// or structure that violates the report invariants)
    #[error("Malformed report: {0}")]
    Malformed(String),

    /// General I/O error (storage writes and reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while encoding a report or a mail
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No report is registered under the given id
    #[error("Report not found: {0}")]
    NotFound(String),

    /// A report is already registered under the given id
    #[error("Report id already registered: {0}")]
    DuplicateId(String),

    /// Operation requires a live (recording) report
    #[error("Report is read-only: {0}")]
    ReadOnly(String),

    /// Notification could not be handed to its channel
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl ReportError {
    /// Whether this error means the persisted data itself is bad, as opposed
    /// to the storage being unreachable.
    pub fn is_malformed(&self) -> bool {
        matches!(self, ReportError::Malformed(_))
    }
}

/// Result type alias using ReportError
pub type ReportResult<T> = Result<T, ReportError>;
