//! Error types for admission operations.
//!
//! Only internal failures live here. Over-limit and blocked requests are not
//! errors: they are [`Outcome`](crate::decision::Outcome) variants on a
//! [`Verdict`](crate::decision::Verdict).

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A tiered, cost-based or dynamic quota could not be computed.
    #[error("Policy resolution failed: {0}")]
    PolicyResolution(String),
}

impl RateLimitError {
    /// Whether this error means the store could not be reached.
    ///
    /// The failover storage switches to its local map on these.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Connection(_))
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A store command failed.
    #[error("{0}")]
    OperationFailed(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store answered with something the script did not promise.
    #[error("Unexpected store response: {0}")]
    UnexpectedResponse(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid quota configuration.
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    /// Invalid key strategy.
    #[error("Invalid key strategy: {0}")]
    InvalidKeyStrategy(String),

    /// Invalid response configuration (status codes, headers).
    #[error("Invalid response configuration: {0}")]
    InvalidResponse(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// The store did not answer in time.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_classification() {
        let err: RateLimitError = ConnectionError::Timeout(Duration::from_millis(100)).into();
        assert!(err.is_store_unavailable());

        let err: RateLimitError = StorageError::OperationFailed("READONLY replica".into()).into();
        assert!(err.is_store_unavailable());

        let err = RateLimitError::PolicyResolution("tier table missing".into());
        assert!(!err.is_store_unavailable());

        let err: RateLimitError = ConfigError::InvalidQuota("max".into()).into();
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::PolicyResolution("tier lookup failed".into());
        assert_eq!(err.to_string(), "Policy resolution failed: tier lookup failed");

        let err: RateLimitError = ConnectionError::Timeout(Duration::from_millis(50)).into();
        assert!(err.to_string().contains("timed out"));
    }
}
