//! Metrics Collection System
//!
//! Prometheus export of the sync cache's read accounting: one counter per
//! cache or database hit and one histogram of database call latency.
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//! Date: 2024-03-21

use matrixon_core::{config::MetricsConfig, QueryHitRecorder, QuerySource};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, instrument};

use crate::error::{MonitorError, Result};

pub const QUERY_HIT_TOTAL: &str = "matrixon_query_hit_total";
pub const DB_OPER_DURATION_MS: &str = "matrixon_db_oper_duration_ms";

/// [`QueryHitRecorder`] that reports through the `metrics` facade.
///
/// Samples go to whichever recorder is installed globally; [`install`]
/// installs a Prometheus one and keeps its handle for rendering.
///
/// [`install`]: PrometheusHitRecorder::install
pub struct PrometheusHitRecorder {
    service: String,
    handle: Option<PrometheusHandle>,
}

impl PrometheusHitRecorder {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handle: None,
        }
    }

    /// Install the Prometheus recorder as the global `metrics` recorder.
    #[instrument(level = "debug", skip(config), fields(service = %config.service_name))]
    pub fn install(config: &MetricsConfig) -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            MonitorError::MetricsError(format!("Failed to install metrics recorder: {}", e))
        })?;

        info!("✅ Prometheus metrics recorder installed");
        Ok(Self {
            service: config.service_name.clone(),
            handle: Some(handle),
        })
    }

    /// Build around an existing handle.
    pub fn with_handle(service: impl Into<String>, handle: PrometheusHandle) -> Self {
        Self {
            service: service.into(),
            handle: Some(handle),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Prometheus exposition text, if this recorder owns an exporter handle.
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for PrometheusHitRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusHitRecorder")
            .field("service", &self.service)
            .field("exporter", &self.handle.is_some())
            .finish()
    }
}

impl QueryHitRecorder for PrometheusHitRecorder {
    fn record_hit(&self, source: QuerySource, component: &'static str, operation: &'static str) {
        counter!(QUERY_HIT_TOTAL,
            "source" => source.as_str(),
            "component" => component,
            "operation" => operation
        )
        .increment(1);
    }

    fn record_db_duration(
        &self,
        component: &'static str,
        operation: &'static str,
        status: &'static str,
        millis: f64,
    ) {
        histogram!(DB_OPER_DURATION_MS,
            "service" => self.service.clone(),
            "component" => component,
            "operation" => operation,
            "status" => status
        )
        .record(millis);
    }
}
