// =============================================================================
// Matrixon Matrix NextServer - Timeline Buckets Module
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
//   One room's ordered event log, stored as a deque of fixed-size buckets.
//
// =============================================================================

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use matrixon_core::StreamEvent;
use ruma::RoomId;

use crate::{MatrixonError, Result};

#[derive(Default)]
struct Buckets {
    buckets: VecDeque<Vec<Arc<StreamEvent>>>,
    len: usize,
}

impl Buckets {
    fn tail(&self) -> Option<&Arc<StreamEvent>> {
        self.buckets.back().and_then(|bucket| bucket.last())
    }

    fn iter_rev(&self) -> impl Iterator<Item = &Arc<StreamEvent>> {
        self.buckets.iter().rev().flat_map(|bucket| bucket.iter().rev())
    }
}

/// Ordered, capacity-bounded event log of one room.
pub struct Timeline {
    bucket_size: usize,
    inner: RwLock<Buckets>,
}

impl Timeline {
    pub(crate) fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size,
            inner: RwLock::new(Buckets::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.read(|b| b.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the newest resident event.
    pub fn last_offset(&self) -> Option<i64> {
        self.read(|b| b.tail().map(|event| event.offset))
    }

    /// Copy of the resident events, oldest first.
    pub fn events(&self) -> Vec<Arc<StreamEvent>> {
        self.read(|b| b.buckets.iter().flatten().cloned().collect())
    }

    /// Visit events newest first until `f` returns `false`.
    ///
    /// `f` receives the event's position in the resident log (0 is the
    /// oldest). The timeline is read-locked for the whole walk, so `f` must
    /// not append to the same room.
    pub fn for_range_reverse<F>(&self, mut f: F)
    where
        F: FnMut(usize, &Arc<StreamEvent>) -> bool,
    {
        self.read(|b| {
            for (idx, event) in (0..b.len).rev().zip(b.iter_rev()) {
                if !f(idx, event) {
                    break;
                }
            }
        })
    }

    pub(crate) fn push(&self, room_id: &RoomId, event: Arc<StreamEvent>, strict: bool) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let b = &mut *guard;

        if let Some(last) = b.tail() {
            let rejected = if strict {
                event.offset <= last.offset
            } else {
                b.iter_rev().any(|existing| existing.offset == event.offset)
            };
            if rejected {
                return Err(MatrixonError::OutOfOrder {
                    room_id: room_id.to_string(),
                    offset: event.offset,
                    last_offset: last.offset,
                });
            }
        }

        let tail_full = b
            .buckets
            .back()
            .map_or(true, |bucket| bucket.len() >= self.bucket_size);
        if tail_full {
            b.buckets.push_back(Vec::with_capacity(self.bucket_size));
        }
        if let Some(bucket) = b.buckets.back_mut() {
            bucket.push(event);
            b.len += 1;
        }
        Ok(())
    }

    /// Drop the oldest events until at most `max_entries` remain. Whole
    /// buckets go first; only the last partial step touches a bucket's
    /// contents.
    pub(crate) fn compact(&self, max_entries: usize) -> usize {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let b = &mut *guard;
        if b.len <= max_entries {
            return 0;
        }

        let before = b.len;
        while let Some(front) = b.buckets.front() {
            let front_len = front.len();
            if b.len - front_len < max_entries {
                break;
            }
            b.buckets.pop_front();
            b.len -= front_len;
        }

        let excess = b.len.saturating_sub(max_entries);
        if excess > 0 {
            if let Some(front) = b.buckets.front_mut() {
                front.drain(..excess);
            }
            b.len -= excess;
        }
        before - b.len
    }

    fn read<T>(&self, f: impl FnOnce(&Buckets) -> T) -> T {
        let b = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&b)
    }
}
