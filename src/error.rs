//! Error types for the metrics reporting pipeline

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the reporting pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed metric identity passed to the registry
    #[error("Invalid metric identity: {0}")]
    InvalidIdentity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Delivery to a sink failed
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single send attempt.
///
/// Transient failures (network, server overload, timeouts) count towards the
/// delivery policy's backoff threshold. Permanent failures (malformed
/// payload, authentication) are reported and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Retry-eligible failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that will not succeed on retry
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Attempt exceeded its time bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl SinkError {
    /// Whether this failure counts towards backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_) | SinkError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert!(SinkError::Timeout(Duration::from_secs(3)).is_transient());
        assert!(SinkError::Transient("connection refused".into()).is_transient());
        assert!(!SinkError::Permanent("400 Bad Request".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidIdentity("metric name must not be empty".into());
        assert_eq!(
            err.to_string(),
            "Invalid metric identity: metric name must not be empty"
        );

        let err: Error = SinkError::Permanent("unauthorized".into()).into();
        assert_eq!(err.to_string(), "Sink error: permanent failure: unauthorized");
    }
}
