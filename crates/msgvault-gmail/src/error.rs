//! Error types for Gmail API operations.

use thiserror::Error;

/// Result type alias for Gmail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during Gmail API operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote resource does not exist (HTTP 404).
    ///
    /// Mutation callers treat this as success (the work is already done);
    /// fetch callers treat it as a skip.
    #[error("not found: {path}")]
    NotFound {
        /// Request path that returned 404.
        path: String,
    },

    /// The API rejected the request for quota reasons (HTTP 429, or 403
    /// with a rate-limit reason in the body).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retryable API error (4xx other than 404/429).
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// Server error that persisted through all retries.
    #[error("server error {status} after {attempts} attempts: {message}")]
    ServerExhausted {
        /// HTTP status code of the last attempt.
        status: u16,
        /// Number of attempts made.
        attempts: u32,
        /// Response body excerpt.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Authentication token could not be obtained.
    #[error("auth error: {0}")]
    Auth(String),

    /// I/O failure reading stored credentials.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Builds a not-found error for the given request path.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true if this error is a remote 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        assert!(Error::not_found("/users/me/messages/x").is_not_found());
        assert!(!Error::Cancelled.is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Api {
            status: 400,
            message: "bad request".to_string(),
        };
        assert_eq!(err.to_string(), "API error 400: bad request");
    }
}
