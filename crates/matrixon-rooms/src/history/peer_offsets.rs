// =============================================================================
// Matrixon Matrix NextServer - Peer Offsets Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Highest offset attributed to each origin server, per room. Backfill
//   uses these to bound what it asks remote servers for. A room's map is
//   fetched as a whole on first use; afterwards single entries are
//   overwritten as events arrive or reconciliation corrects them.
//
// =============================================================================

use std::{
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use dashmap::DashMap;
use matrixon_core::QuerySource;
use ruma::{OwnedServerName, RoomId, ServerName};
use tracing::{debug, error, info, instrument, warn};

use super::{release_idle_signal, signal_for, LoadClaim, RoomHistoryRepo};
use crate::{MatrixonError, Result};

/// Origin server to highest offset, for one room.
pub type PeerOffsets = DashMap<OwnedServerName, i64>;

/// Result of [`RoomHistoryRepo::prime_all_peer_offsets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimeOutcome {
    /// Storage was read; `owned` of `rows` belonged to this instance.
    Primed { rows: usize, owned: usize },
    /// Already primed, or another caller is priming right now.
    Skipped,
}

impl RoomHistoryRepo {
    /// The room's peer offset map, fetched from storage on first use.
    ///
    /// Concurrent callers share one fetch. Callers that find a fetch in
    /// flight wait for it; if it fails they retry it themselves, and after
    /// `peer_offset_wait_timeout_secs` they give up with
    /// [`MatrixonError::Timeout`].
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn load_peer_offsets(&self, room_id: &RoomId) -> Result<Arc<PeerOffsets>> {
        let poll = self.inner.config.peer_offset_poll_interval();
        let deadline = self.inner.config.peer_offset_wait_timeout();
        let started = Instant::now();

        loop {
            if let Some(offsets) = self.cached_peer_offsets(room_id) {
                return Ok(offsets);
            }

            if let Some(claim) = LoadClaim::try_acquire(
                &self.inner.domain_loading,
                &self.inner.domain_signals,
                room_id,
            ) {
                let fetched = self.fetch_peer_offsets(room_id).await;
                drop(claim);
                return fetched;
            }

            let signal = signal_for(&self.inner.domain_signals, room_id);
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inner.domain_loading.contains(room_id) {
                self.release_domain_signal(room_id);
                continue;
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                self.release_domain_signal(room_id);
                warn!(
                    spend_ms = elapsed.as_millis() as u64,
                    "gave up waiting for peer offsets load"
                );
                return Err(MatrixonError::Timeout(format!(
                    "peer offsets of {room_id} still loading, try again later"
                )));
            }
            let _ = tokio::time::timeout(poll.min(deadline - elapsed), notified).await;
        }
    }

    /// Highest offset attributed to `domain` in the room, `-1` when unknown
    /// or when the room's map cannot be loaded.
    pub async fn peer_max_offset(&self, room_id: &RoomId, domain: &ServerName) -> i64 {
        let offsets = match self.load_peer_offsets(room_id).await {
            Ok(offsets) => offsets,
            Err(e) => {
                debug!(room_id = %room_id, error = %e, "peer offsets unavailable");
                return -1;
            }
        };

        let found = offsets.get(domain).map(|offset| *offset);
        match found {
            Some(offset) => {
                self.record_hit(QuerySource::Cache, "GetDomainMaxStream");
                offset
            }
            None => -1,
        }
    }

    /// Overwrite the entry for `domain`. Unlike the latest offset this may
    /// move backwards.
    pub fn set_peer_max_offset(&self, room_id: &RoomId, domain: &ServerName, offset: i64) {
        let offsets = Arc::clone(
            self.inner
                .domain_max_offset
                .entry(room_id.to_owned())
                .or_default()
                .value(),
        );
        offsets.insert(domain.to_owned(), offset);
    }

    /// Preload peer offsets of every room this instance owns. Runs once per
    /// repository; concurrent and repeated calls are skipped. A storage
    /// failure clears both flags so a later call can try again.
    #[instrument(skip(self))]
    pub async fn prime_all_peer_offsets(&self) -> Result<PrimeOutcome> {
        let inner = &self.inner;
        if inner.has_loaded_max_stream.load(Ordering::Acquire) {
            return Ok(PrimeOutcome::Skipped);
        }
        if inner
            .is_loading_max_stream
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(PrimeOutcome::Skipped);
        }
        if inner.has_loaded_max_stream.load(Ordering::Acquire) {
            inner.is_loading_max_stream.store(false, Ordering::Release);
            return Ok(PrimeOutcome::Skipped);
        }

        let started = Instant::now();
        let result = inner.db.rooms_domain_offsets().await;
        let spend = started.elapsed();
        self.observe_db("loadAllDomainMaxStream", spend, result.is_ok());

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    spend_ms = spend.as_millis() as u64,
                    error = %e,
                    "❌ Failed to prime peer offsets"
                );
                inner.has_loaded_max_stream.store(false, Ordering::Release);
                inner.is_loading_max_stream.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let total = rows.len();
        let mut owned = 0;
        for row in rows {
            if !inner.sharding.is_owned(&row.room_id) {
                continue;
            }
            owned += 1;
            let offsets = Arc::clone(
                inner
                    .domain_max_offset
                    .entry(row.room_id)
                    .or_default()
                    .value(),
            );
            offsets.entry(row.domain).or_insert(row.offset);
        }

        inner.has_loaded_max_stream.store(true, Ordering::Release);
        inner.is_loading_max_stream.store(false, Ordering::Release);
        info!(rows = total, owned, "✅ Peer offsets primed");
        Ok(PrimeOutcome::Primed { rows: total, owned })
    }

    fn release_domain_signal(&self, room_id: &RoomId) {
        release_idle_signal(
            &self.inner.domain_signals,
            &self.inner.domain_loading,
            room_id,
        );
    }

    fn cached_peer_offsets(&self, room_id: &RoomId) -> Option<Arc<PeerOffsets>> {
        self.inner
            .domain_max_offset
            .get(room_id)
            .map(|offsets| Arc::clone(offsets.value()))
    }

    /// Runs while holding the room's loading claim.
    async fn fetch_peer_offsets(&self, room_id: &RoomId) -> Result<Arc<PeerOffsets>> {
        self.record_hit(QuerySource::Db, "LoadDomainMaxStream");

        let started = Instant::now();
        let result = self.inner.db.domain_max_offsets(room_id).await;
        let spend = started.elapsed();
        self.observe_db("LoadDomainMaxStream", spend, result.is_ok());

        let rows = result.map_err(|e| {
            error!(
                room_id = %room_id,
                spend_ms = spend.as_millis() as u64,
                error = %e,
                "load db failed for peer offsets"
            );
            e
        })?;

        // entries written while the fetch was running are newer than storage
        let offsets = Arc::clone(
            self.inner
                .domain_max_offset
                .entry(room_id.to_owned())
                .or_default()
                .value(),
        );
        for (domain, offset) in rows {
            offsets.entry(domain).or_insert(offset);
        }
        Ok(offsets)
    }
}
