// =============================================================================
// Matrixon Matrix NextServer - Room Positions Module
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
//   Latest offset and minimum retained offset per room.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use matrixon_core::QuerySource;
use ruma::{OwnedRoomId, RoomId};
use tracing::{error, instrument};

use super::RoomHistoryRepo;
use crate::Result;

/// Highest offset seen per room. Only ever moves forward.
///
/// One lock covers every room; the critical section is a single
/// compare-and-store.
#[derive(Default)]
pub struct RoomLatestOffsets {
    offsets: Mutex<HashMap<OwnedRoomId, i64>>,
}

impl RoomLatestOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored offset, or `-1` when unknown.
    pub fn get(&self, room_id: &RoomId) -> i64 {
        self.lock().get(room_id).copied().unwrap_or(-1)
    }

    /// Store `offset` if it exceeds the current value. Returns whether it did.
    pub fn set_if_greater(&self, room_id: &RoomId, offset: i64) -> bool {
        let mut offsets = self.lock();
        match offsets.get_mut(room_id) {
            Some(current) if *current >= offset => false,
            Some(current) => {
                *current = offset;
                true
            }
            None => {
                offsets.insert(room_id.to_owned(), offset);
                true
            }
        }
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.lock().contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OwnedRoomId, i64>> {
        self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RoomHistoryRepo {
    /// Highest offset seen for the room, `-1` when unknown.
    pub fn latest_offset(&self, room_id: &RoomId) -> i64 {
        self.inner.latest.get(room_id)
    }

    pub fn set_latest_offset(&self, room_id: &RoomId, offset: i64) -> bool {
        self.inner.latest.set_if_greater(room_id, offset)
    }

    /// Warm the latest-offset tracker for every room not yet cached, with a
    /// single storage query.
    #[instrument(skip(self, room_ids), fields(rooms = room_ids.len()))]
    pub async fn load_latest_for_rooms(&self, room_ids: &[OwnedRoomId]) -> Result<()> {
        let missing: Vec<OwnedRoomId> = room_ids
            .iter()
            .filter(|room_id| !self.inner.latest.contains(room_id))
            .cloned()
            .collect();

        let cached = room_ids.len() - missing.len();
        for _ in 0..cached {
            self.record_hit(QuerySource::Cache, "LoadRoomLatest");
        }
        if missing.is_empty() {
            return Ok(());
        }
        self.record_hit(QuerySource::Db, "LoadRoomLatest");

        let started = Instant::now();
        let result = self.inner.db.room_last_offsets(&missing).await;
        let spend = started.elapsed();
        self.observe_db("loadRoomLatest", spend, result.is_ok());

        let offsets = result.map_err(|e| {
            error!(
                rooms = missing.len(),
                spend_ms = spend.as_millis() as u64,
                error = %e,
                "load db failed for room latest offsets"
            );
            e
        })?;

        for (room_id, offset) in offsets {
            self.inner.latest.set_if_greater(&room_id, offset);
        }
        Ok(())
    }

    /// Lowest offset storage still retains for the room.
    ///
    /// Fetched once and cached for the life of the process. A failed fetch
    /// returns `-1` and is not cached, so the next call asks storage again.
    pub async fn min_stream(&self, room_id: &RoomId) -> i64 {
        if let Some(min_stream) = self.inner.min_stream.get(room_id) {
            self.record_hit(QuerySource::Cache, "GetRoomMinStream");
            return *min_stream;
        }
        self.record_hit(QuerySource::Db, "GetRoomMinStream");

        let started = Instant::now();
        let result = self.inner.db.output_min_stream(room_id).await;
        let spend = started.elapsed();
        self.observe_db("getRoomMinStream", spend, result.is_ok());

        match result {
            Ok(min_stream) => *self
                .inner
                .min_stream
                .entry(room_id.to_owned())
                .or_insert(min_stream),
            Err(e) => {
                error!(
                    room_id = %room_id,
                    spend_ms = spend.as_millis() as u64,
                    error = %e,
                    "load db failed for room min stream"
                );
                -1
            }
        }
    }

    pub fn set_min_stream(&self, room_id: &RoomId, min_stream: i64) {
        self.inner.min_stream.insert(room_id.to_owned(), min_stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::room_id;
    use std::sync::Arc;

    #[test]
    fn unknown_room_reads_sentinel() {
        let offsets = RoomLatestOffsets::new();
        assert_eq!(offsets.get(room_id!("!r1:example.org")), -1);
        assert!(offsets.is_empty());
    }

    #[test]
    fn latest_never_moves_backwards() {
        let room = room_id!("!r1:example.org");
        let offsets = RoomLatestOffsets::new();
        assert!(offsets.set_if_greater(room, 10));
        assert!(!offsets.set_if_greater(room, 5));
        assert!(!offsets.set_if_greater(room, 10));
        assert_eq!(offsets.get(room), 10);
    }

    #[test]
    fn concurrent_updates_keep_the_maximum() {
        let room = room_id!("!r1:example.org");
        let offsets = Arc::new(RoomLatestOffsets::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let offsets = Arc::clone(&offsets);
                std::thread::spawn(move || {
                    // descending writes so most calls lose the race
                    for i in (0..100).rev() {
                        offsets.set_if_greater(room_id!("!r1:example.org"), i * 8 + t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(offsets.get(room), 799);
    }
}
