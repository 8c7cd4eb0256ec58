//! Core traits for Matrixon
//!
//! The sync cache reports every read as either served from memory or from
//! the database, and reports how long each database call took. The sink is
//! injected once at construction and never mutated by the cache.

use std::fmt;

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuerySource {
    Cache,
    Db,
}

impl QuerySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuerySource::Cache => "cache",
            QuerySource::Db => "db",
        }
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability sink for cache reads and database calls.
pub trait QueryHitRecorder: Send + Sync {
    /// Count one read of `operation` on `component`.
    fn record_hit(&self, source: QuerySource, component: &'static str, operation: &'static str);

    /// Record the latency of one database call. `status` is `"200"` on
    /// success and `"500"` on failure.
    fn record_db_duration(
        &self,
        component: &'static str,
        operation: &'static str,
        status: &'static str,
        millis: f64,
    );
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl QueryHitRecorder for NoopRecorder {
    fn record_hit(&self, _source: QuerySource, _component: &'static str, _operation: &'static str) {}

    fn record_db_duration(
        &self,
        _component: &'static str,
        _operation: &'static str,
        _status: &'static str,
        _millis: f64,
    ) {
    }
}
