//! Logging System
//!
//! Installs the global `tracing` subscriber for the sync cache process.
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//! Date: 2024-03-21

use matrixon_core::config::LoggingConfig;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::{MonitorError, Result};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `config.level`. A no-op when a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        debug!("⚠️ Global subscriber already installed, keeping it");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| MonitorError::LoggingError(format!("Invalid log level: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(config.with_target)
        .try_init()
        .map_err(|e| {
            MonitorError::LoggingError(format!("Failed to set global subscriber: {}", e))
        })?;

    info!(level = %config.level, "✅ Logging initialized");
    Ok(())
}

/// Log operation start
#[macro_export]
macro_rules! operation_start {
    ($name:expr) => {
        tracing::info!("🔧 Starting operation: {}", $name)
    };
}

/// Log operation complete
#[macro_export]
macro_rules! operation_complete {
    ($name:expr, $duration:expr) => {
        tracing::info!("✅ Completed operation {} in {:?}", $name, $duration)
    };
}
