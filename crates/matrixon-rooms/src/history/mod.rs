// =============================================================================
// Matrixon Matrix NextServer - Room History Module
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
//   Room history cache used by sync and backfill. Timelines are hydrated
//   from the database on first use, at most one load per room at a time;
//   callers either kick a load off and move on, or wait for it with a
//   bounded deadline. Alongside the timelines the repository tracks each
//   room's latest offset, minimum retained offset and per-origin-server
//   max offsets.
//
// =============================================================================

mod data;
mod peer_offsets;
mod positions;

use std::{
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use matrixon_core::{
    config::{ServerConfig, TimelineCacheConfig},
    ClientEvent, QueryHitRecorder, QuerySource, StreamEvent,
};
use ruma::{EventId, OwnedRoomId, RoomId};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::{
    sharding::ShardingFilter,
    timeline::{Timeline, TimelineRepo},
    Result,
};

pub use data::Data;
pub use peer_offsets::{PeerOffsets, PrimeOutcome};
pub use positions::RoomLatestOffsets;

const COMPONENT: &str = "RoomHistoryRepo";

/// Number of entries resident in each cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoomHistoryLoadedData {
    pub timeline: usize,
    pub latest: usize,
    pub min_stream: usize,
    pub domain_max_offset: usize,
    pub max_entries: usize,
}

/// Shared room history cache. Clones are cheap handles onto the same state.
#[derive(Clone)]
pub struct RoomHistoryRepo {
    inner: Arc<Inner>,
}

struct Inner {
    repo: TimelineRepo,
    db: Arc<dyn Data>,
    recorder: Arc<dyn QueryHitRecorder>,
    config: TimelineCacheConfig,
    sharding: ShardingFilter,

    history_loading: DashSet<OwnedRoomId>,
    history_ready: DashSet<OwnedRoomId>,
    history_signals: DashMap<OwnedRoomId, Arc<Notify>>,

    latest: RoomLatestOffsets,
    min_stream: DashMap<OwnedRoomId, i64>,

    domain_max_offset: DashMap<OwnedRoomId, Arc<PeerOffsets>>,
    domain_loading: DashSet<OwnedRoomId>,
    domain_signals: DashMap<OwnedRoomId, Arc<Notify>>,
    has_loaded_max_stream: AtomicBool,
    is_loading_max_stream: AtomicBool,
}

/// Exclusive right to load one room. Dropping it releases the room and wakes
/// everyone waiting on it, whether the load succeeded or not.
struct LoadClaim<'a> {
    loading: &'a DashSet<OwnedRoomId>,
    signals: &'a DashMap<OwnedRoomId, Arc<Notify>>,
    room_id: &'a RoomId,
}

impl<'a> LoadClaim<'a> {
    fn try_acquire(
        loading: &'a DashSet<OwnedRoomId>,
        signals: &'a DashMap<OwnedRoomId, Arc<Notify>>,
        room_id: &'a RoomId,
    ) -> Option<Self> {
        loading
            .insert(room_id.to_owned())
            .then(|| Self::adopt(loading, signals, room_id))
    }

    /// Take over a claim whose `loading` entry was inserted by the caller.
    fn adopt(
        loading: &'a DashSet<OwnedRoomId>,
        signals: &'a DashMap<OwnedRoomId, Arc<Notify>>,
        room_id: &'a RoomId,
    ) -> Self {
        Self {
            loading,
            signals,
            room_id,
        }
    }
}

impl Drop for LoadClaim<'_> {
    fn drop(&mut self) {
        self.loading.remove(self.room_id);
        if let Some((_, signal)) = self.signals.remove(self.room_id) {
            signal.notify_waiters();
        }
    }
}

/// Drop the room's signal when no load is running to fire it.
fn release_idle_signal(
    signals: &DashMap<OwnedRoomId, Arc<Notify>>,
    loading: &DashSet<OwnedRoomId>,
    room_id: &RoomId,
) {
    signals.remove_if(room_id, |_, _| !loading.contains(room_id));
}

fn signal_for(signals: &DashMap<OwnedRoomId, Arc<Notify>>, room_id: &RoomId) -> Arc<Notify> {
    Arc::clone(
        signals
            .entry(room_id.to_owned())
            .or_insert_with(|| Arc::new(Notify::new()))
            .value(),
    )
}

impl RoomHistoryRepo {
    pub fn new(
        config: TimelineCacheConfig,
        sharding: ShardingFilter,
        db: Arc<dyn Data>,
        recorder: Arc<dyn QueryHitRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo: TimelineRepo::from_config(&config),
                db,
                recorder,
                sharding,
                history_loading: DashSet::new(),
                history_ready: DashSet::new(),
                history_signals: DashMap::new(),
                latest: RoomLatestOffsets::new(),
                min_stream: DashMap::new(),
                domain_max_offset: DashMap::new(),
                domain_loading: DashSet::new(),
                domain_signals: DashMap::new(),
                has_loaded_max_stream: AtomicBool::new(false),
                is_loading_max_stream: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        db: Arc<dyn Data>,
        recorder: Arc<dyn QueryHitRecorder>,
    ) -> Self {
        Self::new(
            config.timeline.clone(),
            ShardingFilter::from_config(&config.multi_instance),
            db,
            recorder,
        )
    }

    /// The underlying timeline store.
    pub fn timelines(&self) -> &TimelineRepo {
        &self.inner.repo
    }

    pub fn loaded_data(&self) -> RoomHistoryLoadedData {
        let (timeline, max_entries) = self.inner.repo.key_numbers();
        RoomHistoryLoadedData {
            timeline,
            latest: self.inner.latest.len(),
            min_stream: self.inner.min_stream.len(),
            domain_max_offset: self.inner.domain_max_offset.len(),
            max_entries,
        }
    }

    /// Append a freshly ingested event.
    ///
    /// With `load` set the room's history is hydrated first, except for
    /// `m.room.create` which starts a room that has no history yet. The
    /// room's latest offset advances even when the timeline rejects the
    /// event as out of order.
    #[tracing::instrument(skip(self, event), fields(room_id = %event.room_id, event_id = %event.event_id))]
    pub async fn append_event(&self, event: ClientEvent, offset: i64, load: bool) -> Result<()> {
        if load && !event.is_create() {
            self.load_history(&event.room_id, true).await;
        }
        self.add_stream_event(StreamEvent::new(event, offset))
    }

    fn add_stream_event(&self, event: StreamEvent) -> Result<()> {
        let event = Arc::new(event);
        let room_id = event.room_id();

        match event.event.state_key() {
            Some(state_key) => debug!(
                sender = %event.sender(),
                state_key,
                room_id = %room_id,
                offset = event.offset,
                "update room history timeline"
            ),
            None => debug!(
                sender = %event.sender(),
                room_id = %room_id,
                offset = event.offset,
                "update room history timeline"
            ),
        }

        let added = self.inner.repo.add(room_id, Arc::clone(&event));
        self.inner.latest.set_if_greater(room_id, event.offset);
        added
    }

    /// Make sure the room's history is resident.
    ///
    /// Only one load per room runs at a time. With `synchronous` unset the
    /// load runs on a spawned task and this returns immediately; otherwise
    /// the caller either runs the load itself or waits for the running one
    /// (bounded by `ready_timeout_secs`).
    pub async fn load_history(&self, room_id: &RoomId, synchronous: bool) {
        if !synchronous {
            self.trigger_load(room_id);
            return;
        }

        if self.is_resident(room_id) {
            self.record_hit(QuerySource::Cache, "LoadHistory");
            return;
        }

        if self.inner.history_loading.insert(room_id.to_owned()) {
            self.fetch_history(room_id).await;
        } else {
            self.ensure_ready(room_id, true).await;
        }
    }

    /// Whether the room's history is resident.
    ///
    /// Non-blocking calls kick a load off and report the state seen before
    /// it. Blocking calls poll until the room is ready or the deadline
    /// passes, re-triggering the load on every round in case a previous
    /// attempt failed.
    pub async fn ensure_ready(&self, room_id: &RoomId, blocking: bool) -> bool {
        let ready = self.is_resident(room_id);
        if ready || !blocking {
            if !blocking {
                self.trigger_load(room_id);
            }
            return ready;
        }

        let poll = self.inner.config.ready_poll_interval();
        let deadline = self.inner.config.ready_timeout();
        let started = Instant::now();
        loop {
            if self.is_resident(room_id) {
                self.release_history_signal(room_id);
                return true;
            }
            self.trigger_load(room_id);

            let signal = signal_for(&self.inner.history_signals, room_id);
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_resident(room_id) {
                self.release_history_signal(room_id);
                return true;
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                error!(
                    room_id = %room_id,
                    spend_secs = elapsed.as_secs(),
                    "room history still not ready, giving up"
                );
                self.release_history_signal(room_id);
                return self.is_resident(room_id);
            }

            let wait = poll.min(deadline - elapsed);
            let woken = tokio::time::timeout(wait, notified).await.is_ok();
            if woken && !self.is_resident(room_id) {
                // the load ended without success; keep the poll cadence
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Hydrate the room if needed and return its timeline.
    pub async fn get_timeline(&self, room_id: &RoomId) -> Option<Arc<Timeline>> {
        self.load_history(room_id, true).await;
        self.inner.repo.get_timeline(room_id)
    }

    pub async fn get_event_by_id(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Option<Arc<StreamEvent>> {
        let history = self.get_timeline(room_id).await?;

        let mut found = None;
        history.for_range_reverse(|_, event| {
            if event.event_id() == event_id {
                found = Some(Arc::clone(event));
                return false;
            }
            true
        });
        found
    }

    pub async fn get_last_event(&self, room_id: &RoomId) -> Option<Arc<StreamEvent>> {
        let history = self.get_timeline(room_id).await?;

        let mut last = None;
        history.for_range_reverse(|_, event| {
            last = Some(Arc::clone(event));
            false
        });
        last
    }

    /// Newest message-like event and newest event of any kind.
    pub async fn get_last_message_event(
        &self,
        room_id: &RoomId,
    ) -> (Option<Arc<StreamEvent>>, Option<Arc<StreamEvent>>) {
        let Some(history) = self.get_timeline(room_id).await else {
            return (None, None);
        };

        let mut last_message = None;
        let mut last = None;
        history.for_range_reverse(|_, event| {
            if last.is_none() {
                last = Some(Arc::clone(event));
            }
            if event.event.is_message() {
                last_message = Some(Arc::clone(event));
                return false;
            }
            true
        });
        (last_message, last)
    }

    /// Ready and still resident. A ready room whose timeline was evicted is
    /// reset to cold so the next load hydrates it again.
    fn is_resident(&self, room_id: &RoomId) -> bool {
        if !self.inner.history_ready.contains(room_id) {
            return false;
        }
        if self.inner.repo.get_timeline(room_id).is_some() {
            return true;
        }
        warn!(room_id = %room_id, "room marked ready but timeline is gone, reloading");
        self.inner.history_ready.remove(room_id);
        false
    }

    fn release_history_signal(&self, room_id: &RoomId) {
        release_idle_signal(
            &self.inner.history_signals,
            &self.inner.history_loading,
            room_id,
        );
    }

    fn trigger_load(&self, room_id: &RoomId) {
        if self.is_resident(room_id) {
            self.record_hit(QuerySource::Cache, "LoadHistory");
            return;
        }
        if !self.inner.history_loading.insert(room_id.to_owned()) {
            return;
        }

        let this = self.clone();
        let room_id = room_id.to_owned();
        tokio::spawn(async move {
            this.fetch_history(&room_id).await;
        });
    }

    /// Runs with the room's `history_loading` entry already claimed.
    async fn fetch_history(&self, room_id: &RoomId) {
        let _claim = LoadClaim::adopt(
            &self.inner.history_loading,
            &self.inner.history_signals,
            room_id,
        );

        // a load that finished before the claim was taken leaves nothing to do
        if self.is_resident(room_id) {
            self.record_hit(QuerySource::Cache, "LoadHistory");
            return;
        }
        self.record_hit(QuerySource::Db, "LoadHistory");

        let started = Instant::now();
        let result = self
            .inner
            .db
            .history_events(room_id, self.inner.config.history_load_limit)
            .await;
        let spend = started.elapsed();

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                self.observe_db("loadHistory", spend, false);
                error!(
                    room_id = %room_id,
                    spend_ms = spend.as_millis() as u64,
                    error = %e,
                    "load db failed for room history"
                );
                return;
            }
        };
        self.observe_db("loadHistory", spend, true);

        let loaded = events.len();
        // newest first from the database; replay oldest first
        for event in events.into_iter().rev() {
            if let Err(e) = self.add_stream_event(event) {
                debug!(room_id = %room_id, error = %e, "skipped history event during replay");
            }
        }
        if loaded == 0 {
            self.inner.repo.set_default(room_id);
        }

        self.inner.history_ready.insert(room_id.to_owned());
        info!(room_id = %room_id, events = loaded, "✅ Room history loaded");
    }

    fn record_hit(&self, source: QuerySource, operation: &'static str) {
        self.inner.recorder.record_hit(source, COMPONENT, operation);
    }

    fn observe_db(&self, operation: &'static str, spend: Duration, ok: bool) {
        let status = if ok { "200" } else { "500" };
        self.inner
            .recorder
            .record_db_duration(COMPONENT, operation, status, spend.as_secs_f64() * 1000.0);

        if !ok {
            return;
        }
        let threshold = self.inner.config.slow_query_threshold();
        if spend > threshold {
            warn!(
                operation,
                spend_ms = spend.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "load db exceeded slow query threshold"
            );
        } else {
            debug!(operation, spend_ms = spend.as_millis() as u64, "load db succeeded");
        }
    }
}
