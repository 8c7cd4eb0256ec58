//! Matrixon Monitoring System
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Date: 2024-03-21
//! Version: 0.11.0-alpha
//!
//! Purpose: Observability for the sync cache. Provides the Prometheus
//! backed query hit recorder and database latency histogram, and the
//! process-wide log subscriber setup.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{MonitorError, Result};
pub use logging::init_logging;
pub use metrics::PrometheusHitRecorder;
