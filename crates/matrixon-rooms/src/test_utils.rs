// =============================================================================
// Matrixon Matrix NextServer - Test Utils Module
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
//   In-memory database and recorder doubles with call counters, plus event
//   builders, shared by unit tests and downstream integration tests.
//
// =============================================================================

#![cfg(any(test, feature = "testing"))]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use matrixon_core::{
    ClientEvent, EventContent, QueryHitRecorder, QuerySource, RoomDomainOffset, StreamEvent,
};
use ruma::{EventId, OwnedRoomId, OwnedServerName, RoomId, UserId};

use crate::{history::Data, MatrixonError, Result};

static INIT: Once = Once::new();

/// Initialize test logging (call once per test process)
pub fn init_test_environment() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    });
}

/// `m.room.message` event `$ev{offset}` sent by `@alice:example.org`.
pub fn text_event(room_id: &RoomId, offset: i64, body: &str) -> ClientEvent {
    ClientEvent::new(
        EventId::parse(format!("$ev{offset}")).expect("valid event id"),
        room_id.to_owned(),
        UserId::parse("@alice:example.org").expect("valid user id"),
        EventContent::Message {
            msgtype: "m.text".to_owned(),
            body: body.to_owned(),
        },
    )
}

/// State event `$ev{offset}` of type `event_type`.
pub fn state_event(room_id: &RoomId, offset: i64, event_type: &str) -> ClientEvent {
    ClientEvent::new(
        EventId::parse(format!("$ev{offset}")).expect("valid event id"),
        room_id.to_owned(),
        UserId::parse("@alice:example.org").expect("valid user id"),
        EventContent::State {
            event_type: event_type.to_owned(),
            state_key: String::new(),
            content: serde_json::json!({}),
        },
    )
}

/// `m.room.create` event `$ev{offset}`.
pub fn create_event(room_id: &RoomId, offset: i64) -> ClientEvent {
    let creator = UserId::parse("@alice:example.org").expect("valid user id");
    ClientEvent::new(
        EventId::parse(format!("$ev{offset}")).expect("valid event id"),
        room_id.to_owned(),
        creator.clone(),
        EventContent::Create { creator },
    )
}

pub fn stream_event(room_id: &RoomId, offset: i64) -> Arc<StreamEvent> {
    Arc::new(StreamEvent::new(
        text_event(room_id, offset, &format!("message {offset}")),
        offset,
    ))
}

/// Database double. Every read sleeps for the configured delay first and
/// fails while `set_failing(true)` is in effect.
#[derive(Default)]
pub struct MemoryStorage {
    events: Mutex<HashMap<OwnedRoomId, Vec<StreamEvent>>>,
    min_streams: Mutex<HashMap<OwnedRoomId, i64>>,
    domain_offsets: Mutex<HashMap<OwnedRoomId, Vec<(OwnedServerName, i64)>>>,
    delay: Mutex<Duration>,
    failing: AtomicBool,
    history_calls: AtomicUsize,
    min_stream_calls: AtomicUsize,
    domain_calls: AtomicUsize,
    last_offset_calls: AtomicUsize,
    all_domain_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Store an event. Events are kept in ascending offset order.
    pub fn insert_event(&self, event: StreamEvent) {
        let mut events = self.events.lock().unwrap();
        let room = events.entry(event.event.room_id.clone()).or_default();
        room.push(event);
        room.sort_by_key(|e| e.offset);
    }

    /// Store text events with the given offsets.
    pub fn insert_history(&self, room_id: &RoomId, offsets: impl IntoIterator<Item = i64>) {
        for offset in offsets {
            self.insert_event(StreamEvent::new(
                text_event(room_id, offset, &format!("message {offset}")),
                offset,
            ));
        }
    }

    pub fn set_min_stream(&self, room_id: &RoomId, min_stream: i64) {
        self.min_streams
            .lock()
            .unwrap()
            .insert(room_id.to_owned(), min_stream);
    }

    pub fn set_domain_offset(&self, room_id: &RoomId, domain: &str, offset: i64) {
        let domain = OwnedServerName::try_from(domain).expect("valid server name");
        let mut all = self.domain_offsets.lock().unwrap();
        let room = all.entry(room_id.to_owned()).or_default();
        room.retain(|(d, _)| d != &domain);
        room.push((domain, offset));
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn min_stream_calls(&self) -> usize {
        self.min_stream_calls.load(Ordering::SeqCst)
    }

    pub fn domain_calls(&self) -> usize {
        self.domain_calls.load(Ordering::SeqCst)
    }

    pub fn last_offset_calls(&self) -> usize {
        self.last_offset_calls.load(Ordering::SeqCst)
    }

    pub fn all_domain_calls(&self) -> usize {
        self.all_domain_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, calls: &AtomicUsize) -> Result<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatrixonError::database("storage unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Data for MemoryStorage {
    async fn history_events(&self, room_id: &RoomId, limit: usize) -> Result<Vec<StreamEvent>> {
        self.enter(&self.history_calls).await?;
        let events = self.events.lock().unwrap();
        Ok(events
            .get(room_id)
            .map(|room| room.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn output_min_stream(&self, room_id: &RoomId) -> Result<i64> {
        self.enter(&self.min_stream_calls).await?;
        Ok(self
            .min_streams
            .lock()
            .unwrap()
            .get(room_id)
            .copied()
            .unwrap_or(0))
    }

    async fn domain_max_offsets(&self, room_id: &RoomId) -> Result<Vec<(OwnedServerName, i64)>> {
        self.enter(&self.domain_calls).await?;
        Ok(self
            .domain_offsets
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn room_last_offsets(&self, room_ids: &[OwnedRoomId]) -> Result<HashMap<OwnedRoomId, i64>> {
        self.enter(&self.last_offset_calls).await?;
        let events = self.events.lock().unwrap();
        Ok(room_ids
            .iter()
            .filter_map(|room_id| {
                events
                    .get(room_id)
                    .and_then(|room| room.last())
                    .map(|last| (room_id.clone(), last.offset))
            })
            .collect())
    }

    async fn rooms_domain_offsets(&self) -> Result<Vec<RoomDomainOffset>> {
        self.enter(&self.all_domain_calls).await?;
        let all = self.domain_offsets.lock().unwrap();
        Ok(all
            .iter()
            .flat_map(|(room_id, domains)| {
                domains.iter().map(move |(domain, offset)| RoomDomainOffset {
                    room_id: room_id.clone(),
                    domain: domain.clone(),
                    offset: *offset,
                })
            })
            .collect())
    }
}

/// Recorder that keeps every hit for later assertions.
#[derive(Default)]
pub struct CountingRecorder {
    hits: Mutex<Vec<(QuerySource, &'static str)>>,
    db_statuses: Mutex<Vec<(&'static str, &'static str)>>,
}

impl CountingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hits recorded for `operation` from `source`.
    pub fn hits(&self, source: QuerySource, operation: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, op)| *s == source && *op == operation)
            .count()
    }

    /// Statuses recorded for `operation`'s database calls, in order.
    pub fn db_statuses(&self, operation: &str) -> Vec<&'static str> {
        self.db_statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, status)| *status)
            .collect()
    }
}

impl QueryHitRecorder for CountingRecorder {
    fn record_hit(&self, source: QuerySource, _component: &'static str, operation: &'static str) {
        self.hits.lock().unwrap().push((source, operation));
    }

    fn record_db_duration(
        &self,
        _component: &'static str,
        operation: &'static str,
        status: &'static str,
        _millis: f64,
    ) {
        self.db_statuses.lock().unwrap().push((operation, status));
    }
}
