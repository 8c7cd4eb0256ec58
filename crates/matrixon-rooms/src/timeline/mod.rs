// =============================================================================
// Matrixon Matrix NextServer - Timeline Module
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
//   Bounded in-memory room timelines. Each room keeps its events in
//   ascending offset order, split into fixed-size buckets so compaction
//   drops whole buckets instead of shifting every element. Compaction runs
//   every `gc_interval` successful appends rather than on each insert.
//
// =============================================================================

mod buckets;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use matrixon_core::{config::TimelineCacheConfig, StreamEvent};
use ruma::{OwnedRoomId, RoomId};
use tracing::debug;

use crate::Result;

pub use buckets::Timeline;

/// Per-room timeline store.
pub struct TimelineRepo {
    bucket_size: usize,
    strict_ordering: bool,
    max_entries: usize,
    gc_interval: u64,
    timelines: DashMap<OwnedRoomId, Arc<Timeline>>,
    ops: AtomicU64,
}

impl TimelineRepo {
    pub fn new(
        bucket_size: usize,
        bucket_count_hint: usize,
        strict_ordering: bool,
        max_entries: usize,
        gc_interval: u64,
    ) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            strict_ordering,
            max_entries: max_entries.max(1),
            gc_interval: gc_interval.max(1),
            timelines: DashMap::with_capacity(bucket_count_hint),
            ops: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &TimelineCacheConfig) -> Self {
        Self::new(
            config.bucket_size,
            config.bucket_count_hint,
            config.strict_ordering,
            config.max_entries,
            config.gc_interval,
        )
    }

    /// Append `event` at the tail of the room's timeline, creating the
    /// timeline if the room has none yet.
    ///
    /// With strict ordering an offset that does not exceed the current tail
    /// is rejected with [`MatrixonError::OutOfOrder`](crate::MatrixonError::OutOfOrder)
    /// and the timeline is left untouched. Without it only exact duplicate
    /// offsets are rejected.
    pub fn add(&self, room_id: &RoomId, event: Arc<StreamEvent>) -> Result<()> {
        let timeline = Arc::clone(
            self.timelines
                .entry(room_id.to_owned())
                .or_insert_with(|| Arc::new(Timeline::new(self.bucket_size)))
                .value(),
        );

        timeline.push(room_id, event, self.strict_ordering)?;

        let ops = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % self.gc_interval == 0 {
            self.compact();
        }
        Ok(())
    }

    /// The room's resident timeline, `None` when nothing has been loaded.
    pub fn get_timeline(&self, room_id: &RoomId) -> Option<Arc<Timeline>> {
        self.timelines
            .get(room_id)
            .map(|timeline| Arc::clone(timeline.value()))
    }

    /// Mark the room as loaded with no events.
    pub fn set_default(&self, room_id: &RoomId) {
        self.timelines
            .entry(room_id.to_owned())
            .or_insert_with(|| Arc::new(Timeline::new(self.bucket_size)));
    }

    /// Drop the room's resident timeline. Returns whether one was resident.
    pub fn evict(&self, room_id: &RoomId) -> bool {
        self.timelines.remove(room_id).is_some()
    }

    /// `(resident rooms, resident events across all rooms)`
    pub fn key_numbers(&self) -> (usize, usize) {
        let entries = self
            .timelines
            .iter()
            .map(|timeline| timeline.value().len())
            .sum();
        (self.timelines.len(), entries)
    }

    /// Trim every timeline back to `max_entries`, oldest buckets first.
    /// Returns the number of events dropped.
    pub fn compact(&self) -> usize {
        let timelines: Vec<Arc<Timeline>> = self
            .timelines
            .iter()
            .map(|timeline| Arc::clone(timeline.value()))
            .collect();

        let dropped: usize = timelines
            .iter()
            .map(|timeline| timeline.compact(self.max_entries))
            .sum();

        if dropped > 0 {
            debug!(
                rooms = timelines.len(),
                dropped,
                max_entries = self.max_entries,
                "Compacted room timelines"
            );
        }
        dropped
    }
}
