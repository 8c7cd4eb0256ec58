//! Error Handling Module
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Date: 2024-03-21
//! Version: 0.11.0-alpha
//!
//! Purpose: Errors raised while installing the metrics exporter or the
//! global log subscriber.

use thiserror::Error;

/// Main error type for the monitoring system
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Metrics exporter errors
    #[error("Metrics error: {0}")]
    MetricsError(String),

    /// Logging system errors
    #[error("Logging error: {0}")]
    LoggingError(String),
}

/// Result type alias for the monitoring system
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

impl MonitorError {
    /// Log the error with appropriate severity
    pub fn log(&self) {
        match self {
            MonitorError::MetricsError(msg) => tracing::warn!("⚠️ Metrics error: {}", msg),
            MonitorError::LoggingError(msg) => tracing::error!("❌ Logging error: {}", msg),
        }
    }
}

impl From<MonitorError> for matrixon_core::MatrixonError {
    fn from(err: MonitorError) -> Self {
        matrixon_core::MatrixonError::Config(err.to_string())
    }
}
