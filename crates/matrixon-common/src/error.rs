//! Error types for Matrixon
//!
//! Storage failures are transient: callers log them and fall back to
//! "no data" sentinels. Ordering violations are reported to the appender and
//! never abort the process.

use thiserror::Error;

/// Matrixon error types
#[derive(Debug, Error)]
pub enum MatrixonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// An append would move a room's timeline backwards or repeat an offset
    #[error("Out of order event for room {room_id}: offset {offset} is not after {last_offset}")]
    OutOfOrder {
        room_id: String,
        offset: i64,
        last_offset: i64,
    },

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for Matrixon operations
pub type Result<T> = std::result::Result<T, MatrixonError>;

impl MatrixonError {
    /// Shorthand for storage failures reported by a database collaborator.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Whether the caller may simply retry on its next access.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout(_))
    }
}

impl From<tokio::time::error::Elapsed> for MatrixonError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MatrixonError::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_log::test;

    #[test]
    fn test_error_display() {
        let err = MatrixonError::Config("test".to_string());
        assert_eq!(err.to_string(), "Configuration error: test");

        let err = MatrixonError::database("connection reset");
        assert_eq!(err.to_string(), "Database error: connection reset");

        let err = MatrixonError::OutOfOrder {
            room_id: "!r:example.org".to_string(),
            offset: 2,
            last_offset: 3,
        };
        assert_eq!(
            err.to_string(),
            "Out of order event for room !r:example.org: offset 2 is not after 3"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(MatrixonError::database("x").is_transient());
        assert!(MatrixonError::Timeout("x".into()).is_transient());
        assert!(!MatrixonError::InvalidConfig("x".into()).is_transient());
        assert!(!MatrixonError::OutOfOrder {
            room_id: String::new(),
            offset: 1,
            last_offset: 1,
        }
        .is_transient());
    }

    #[test(tokio::test)]
    async fn test_error_conversion_from_elapsed() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err: MatrixonError = elapsed.into();
        assert!(matches!(err, MatrixonError::Timeout(_)));
    }
}
