//! Configuration module for Matrixon
//!
//! Settings for the sync cache: timeline store sizing and load timing,
//! multi-instance sharding, logging and metrics. Values are layered as
//! defaults, then an optional TOML file, then `MATRIXON_` environment
//! variables (`__` separates sections, e.g. `MATRIXON_TIMELINE__MAX_ENTRIES`).

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{MatrixonError, Result};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name (e.g., matrixon.local)
    pub server_name: String,

    /// Room timeline cache configuration
    pub timeline: TimelineCacheConfig,

    /// Multi-instance deployment configuration
    pub multi_instance: MultiInstanceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Room timeline cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineCacheConfig {
    /// Events per bucket inside one room's timeline
    pub bucket_size: usize,
    /// Expected number of resident rooms, used to presize the room map
    pub bucket_count_hint: usize,
    /// Reject appends whose offset does not exceed the current tail
    pub strict_ordering: bool,
    /// Maximum events kept per room once compaction runs
    pub max_entries: usize,
    /// Number of appends between compaction sweeps
    pub gc_interval: u64,
    /// Number of events fetched when hydrating a cold room
    pub history_load_limit: usize,
    /// Poll interval of the blocking readiness wait
    pub ready_poll_interval_ms: u64,
    /// Give-up deadline of the blocking readiness wait
    pub ready_timeout_secs: u64,
    /// Poll interval while another task loads a room's peer offsets
    pub peer_offset_poll_interval_ms: u64,
    /// Give-up deadline while another task loads a room's peer offsets
    pub peer_offset_wait_timeout_secs: u64,
    /// Database calls slower than this are logged as warnings
    pub slow_query_threshold_ms: u64,
}

/// Multi-instance deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiInstanceConfig {
    /// Ordinal of this instance, in `0..total`
    pub instance: u32,
    /// Number of instances sharing the room space
    pub total: u32,
    /// Every instance writes every room
    pub multi_write: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Emit ANSI colours
    pub ansi: bool,
    /// Include the event target in each line
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    pub enabled: bool,
    /// Service label attached to database duration samples
    pub service_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "matrixon.local".to_string(),
            timeline: TimelineCacheConfig::default(),
            multi_instance: MultiInstanceConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TimelineCacheConfig {
    fn default() -> Self {
        Self {
            bucket_size: 16,
            bucket_count_hint: 128,
            strict_ordering: true,
            max_entries: 500,
            gc_interval: 500,
            history_load_limit: 50,
            ready_poll_interval_ms: 50,
            ready_timeout_secs: 35,
            peer_offset_poll_interval_ms: 3,
            peer_offset_wait_timeout_secs: 30,
            slow_query_threshold_ms: 1000,
        }
    }
}

impl Default for MultiInstanceConfig {
    fn default() -> Self {
        Self {
            instance: 0,
            total: 1,
            multi_write: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "syncserver".to_string(),
        }
    }
}

impl TimelineCacheConfig {
    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn peer_offset_poll_interval(&self) -> Duration {
        Duration::from_millis(self.peer_offset_poll_interval_ms)
    }

    pub fn peer_offset_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_offset_wait_timeout_secs)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

impl ServerConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// environment.
    #[instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(MatrixonError::Config(format!(
                    "Config file does not exist: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed("MATRIXON_").split("__"))
            .extract()
            .map_err(|e| MatrixonError::Config(format!("Failed to parse config: {}", e)))?;

        debug!(server_name = %config.server_name, "🔧 Loaded server config");
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(MatrixonError::InvalidConfig("Server name cannot be empty".into()));
        }

        let timeline = &self.timeline;
        if timeline.bucket_size == 0 {
            return Err(MatrixonError::InvalidConfig("timeline.bucket_size cannot be 0".into()));
        }
        if timeline.max_entries == 0 {
            return Err(MatrixonError::InvalidConfig("timeline.max_entries cannot be 0".into()));
        }
        if timeline.gc_interval == 0 {
            return Err(MatrixonError::InvalidConfig("timeline.gc_interval cannot be 0".into()));
        }
        if timeline.history_load_limit == 0 {
            return Err(MatrixonError::InvalidConfig(
                "timeline.history_load_limit cannot be 0".into(),
            ));
        }
        if timeline.ready_poll_interval_ms == 0 {
            return Err(MatrixonError::InvalidConfig(
                "timeline.ready_poll_interval_ms cannot be 0".into(),
            ));
        }
        if timeline.peer_offset_poll_interval_ms == 0 {
            return Err(MatrixonError::InvalidConfig(
                "timeline.peer_offset_poll_interval_ms cannot be 0".into(),
            ));
        }

        let multi = &self.multi_instance;
        if multi.total == 0 {
            return Err(MatrixonError::InvalidConfig("multi_instance.total cannot be 0".into()));
        }
        if multi.instance >= multi.total {
            return Err(MatrixonError::InvalidConfig(format!(
                "multi_instance.instance {} must be below total {}",
                multi.instance, multi.total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_log::test;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.server_name, "matrixon.local");
        assert_eq!(config.timeline.history_load_limit, 50);
        assert_eq!(config.timeline.ready_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.timeline.ready_timeout(), Duration::from_secs(35));
        assert!(config.timeline.strict_ordering);
        assert_eq!(config.multi_instance.total, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ServerConfig::default();
        config.timeline.bucket_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.multi_instance.total = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.multi_instance.total = 3;
        config.multi_instance.instance = 3;
        assert!(config.validate().is_err());

        config.multi_instance.instance = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_intervals_rejected() {
        let mut config = ServerConfig::default();
        config.timeline.ready_poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(MatrixonError::InvalidConfig(msg)) if msg.contains("ready_poll_interval_ms")
        ));

        let mut config = ServerConfig::default();
        config.timeline.peer_offset_poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(MatrixonError::InvalidConfig(msg)) if msg.contains("peer_offset_poll_interval_ms")
        ));
    }

    #[test]
    fn test_config_file_loading() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server_name = "sync.example.org"

[timeline]
max_entries = 64
strict_ordering = false

[multi_instance]
instance = 1
total = 4
"#
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server_name, "sync.example.org");
        assert_eq!(config.timeline.max_entries, 64);
        assert!(!config.timeline.strict_ordering);
        // untouched keys keep their defaults
        assert_eq!(config.timeline.history_load_limit, 50);
        assert_eq!(config.multi_instance.instance, 1);
        assert_eq!(config.multi_instance.total, 4);
    }

    #[test]
    fn test_missing_config_file() {
        let err = ServerConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, MatrixonError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("matrixon.toml", "[timeline]\nmax_entries = 10\n")?;
            jail.set_env("MATRIXON_TIMELINE__MAX_ENTRIES", "42");
            jail.set_env("MATRIXON_MULTI_INSTANCE__MULTI_WRITE", "true");

            let config = ServerConfig::load(Some(Path::new("matrixon.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.timeline.max_entries, 42);
            assert!(config.multi_instance.multi_write);
            Ok(())
        });
    }
}
