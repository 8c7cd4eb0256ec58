// =============================================================================
// Matrixon Matrix NextServer - Sync Cache Library Crate
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Wiring of the sync server's room timeline cache. Validates the server
//   configuration, builds the room history repository around the injected
//   storage and metrics collaborators, and runs the one-shot peer offset
//   primer at startup.
//
// =============================================================================

use std::{sync::Arc, time::Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

// Re-export common types
pub use ruma;
pub use tokio;
pub use tracing;

// Re-export workspace crates
pub use matrixon_common as common;
pub use matrixon_core as core;
pub use matrixon_monitor as monitor;
pub use matrixon_rooms as rooms;

use matrixon_core::{config::ServerConfig, NoopRecorder, QueryHitRecorder};
use matrixon_monitor::{operation_complete, operation_start, PrometheusHitRecorder};
use matrixon_rooms::{Data, PrimeOutcome, RoomHistoryRepo};

pub use matrixon_common::{MatrixonError, Result};

/// The sync server's room timeline cache and its startup tasks.
pub struct SyncCacheComponent {
    config: ServerConfig,
    repo: RoomHistoryRepo,
}

impl SyncCacheComponent {
    /// Validate `config` and build the repository.
    #[instrument(skip_all, fields(server_name = %config.server_name))]
    pub fn new(
        config: ServerConfig,
        storage: Arc<dyn Data>,
        recorder: Arc<dyn QueryHitRecorder>,
    ) -> Result<Self> {
        config.validate()?;

        let repo = RoomHistoryRepo::from_config(&config, storage, recorder);
        info!(
            instance = config.multi_instance.instance,
            total = config.multi_instance.total,
            multi_write = config.multi_instance.multi_write,
            max_entries = config.timeline.max_entries,
            "🔧 Sync cache component created"
        );
        Ok(Self { config, repo })
    }

    /// Like [`new`](Self::new), picking the metrics sink from
    /// `config.metrics`: the global Prometheus recorder when enabled, a no-op
    /// otherwise.
    pub fn with_metrics(config: ServerConfig, storage: Arc<dyn Data>) -> Result<Self> {
        let recorder: Arc<dyn QueryHitRecorder> = if config.metrics.enabled {
            Arc::new(PrometheusHitRecorder::install(&config.metrics)?)
        } else {
            Arc::new(NoopRecorder)
        };
        Self::new(config, storage, recorder)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn repo(&self) -> &RoomHistoryRepo {
        &self.repo
    }

    /// Spawn the peer offset primer.
    pub fn start(&self) -> JoinHandle<Result<PrimeOutcome>> {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            operation_start!("prime_all_peer_offsets");
            let outcome = repo.prime_all_peer_offsets().await;
            match &outcome {
                Ok(_) => operation_complete!("prime_all_peer_offsets", started.elapsed()),
                Err(e) => error!(error = %e, "❌ Peer offset primer failed"),
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixon_rooms::test_utils::MemoryStorage;
    use test_log::test;

    #[test(tokio::test)]
    async fn test_component_rejects_invalid_config() {
        let mut config = ServerConfig::default();
        config.multi_instance.total = 0;

        let result = SyncCacheComponent::new(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(NoopRecorder),
        );
        assert!(matches!(result, Err(MatrixonError::InvalidConfig(_))));
    }

    #[test(tokio::test)]
    async fn test_metrics_disabled_uses_noop_recorder() {
        let mut config = ServerConfig::default();
        config.metrics.enabled = false;

        let component =
            SyncCacheComponent::with_metrics(config, Arc::new(MemoryStorage::new())).unwrap();
        assert_eq!(component.config().server_name, "matrixon.local");
        assert_eq!(component.repo().loaded_data().timeline, 0);
    }
}
