//! Error types for the core library.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Gmail API operation failed.
    #[error("Gmail error: {0}")]
    Gmail(#[from] msgvault_gmail::Error),

    /// The incremental sync cursor was rejected by the remote; the caller
    /// must run a full sync.
    #[error("history too old; run a full sync")]
    HistoryExpired,

    /// Incremental sync was requested for a source with no cursor.
    #[error("no sync cursor for {0}; run a full sync first")]
    FullSyncRequired(String),

    /// No source registered under the given identifier.
    #[error("no source found for {0}")]
    SourceNotFound(String),

    /// No deletion manifest with the given id.
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// A deletion manifest was in the wrong status for the operation.
    #[error("manifest {id} is {actual}, expected {expected}")]
    InvalidManifestStatus {
        /// Manifest id.
        id: String,
        /// Status required by the operation.
        expected: String,
        /// Status actually found.
        actual: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true when this error (or the Gmail error it wraps) is a
    /// cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Gmail(err) => err.is_cancelled(),
            _ => false,
        }
    }
}
