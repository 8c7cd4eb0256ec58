/**
 * Integration tests for the Matrixon sync cache
 */

use std::{sync::Arc, time::Duration};

use matrixon_sync::{
    core::{config::ServerConfig, QuerySource, StreamEvent},
    rooms::{
        sharding::room_shard,
        test_utils::{create_event, init_test_environment, state_event, text_event, CountingRecorder, MemoryStorage},
        PrimeOutcome,
    },
    ruma::{event_id, room_id, server_name, OwnedRoomId, RoomId},
    SyncCacheComponent,
};

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.timeline.ready_poll_interval_ms = 10;
    config.timeline.ready_timeout_secs = 2;
    config
}

/// Ingestion and sync reads through a freshly started component
#[tokio::test]
async fn test_ingest_then_sync_reads() {
    init_test_environment();
    let room = room_id!("!sync:example.org");
    let storage = Arc::new(MemoryStorage::new());
    storage.insert_history(room, 1..=3);
    storage.set_domain_offset(room, "remote.example.org", 2);
    storage.set_min_stream(room, 1);
    let recorder = Arc::new(CountingRecorder::new());

    let component = SyncCacheComponent::new(config(), storage.clone(), recorder.clone()).unwrap();
    let primed = component.start().await.unwrap().unwrap();
    assert_eq!(primed, PrimeOutcome::Primed { rows: 1, owned: 1 });

    let repo = component.repo();
    repo.append_event(text_event(room, 4, "hi"), 4, true).await.unwrap();
    repo.append_event(state_event(room, 5, "m.room.topic"), 5, true).await.unwrap();

    let (message, last) = repo.get_last_message_event(room).await;
    assert_eq!(message.unwrap().offset, 4);
    assert_eq!(last.unwrap().offset, 5);
    assert_eq!(repo.get_event_by_id(room, event_id!("$ev1")).await.unwrap().offset, 1);
    assert_eq!(repo.latest_offset(room), 5);
    assert_eq!(repo.min_stream(room).await, 1);
    assert_eq!(repo.peer_max_offset(room, server_name!("remote.example.org")).await, 2);

    assert_eq!(storage.history_calls(), 1);
    assert_eq!(storage.domain_calls(), 0);
    assert_eq!(recorder.hits(QuerySource::Db, "LoadHistory"), 1);
}

/// A brand-new room never touches storage for history
#[tokio::test]
async fn test_new_room_lifecycle() {
    init_test_environment();
    let room = room_id!("!fresh:example.org");
    let storage = Arc::new(MemoryStorage::new());
    let component =
        SyncCacheComponent::new(config(), storage.clone(), Arc::new(CountingRecorder::new())).unwrap();
    let repo = component.repo();

    repo.append_event(create_event(room, 10), 10, true).await.unwrap();
    let timeline = repo.timelines().get_timeline(room).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(storage.history_calls(), 0);
}

/// Two instances split the primed rooms between them
#[tokio::test]
async fn test_multi_instance_primer_partitions_rooms() {
    init_test_environment();
    let storage = Arc::new(MemoryStorage::new());
    let rooms: Vec<OwnedRoomId> = (0..20)
        .map(|i| RoomId::parse(format!("!shard{i}:example.org")).unwrap())
        .collect();
    for room in &rooms {
        storage.set_domain_offset(room, "remote.example.org", 3);
    }

    let mut owned_total = 0;
    for instance in 0..2 {
        let mut config = config();
        config.multi_instance.instance = instance;
        config.multi_instance.total = 2;
        let component =
            SyncCacheComponent::new(config, storage.clone(), Arc::new(CountingRecorder::new()))
                .unwrap();

        match component.start().await.unwrap().unwrap() {
            PrimeOutcome::Primed { rows, owned } => {
                assert_eq!(rows, rooms.len());
                let expected = rooms
                    .iter()
                    .filter(|room| room_shard(room.as_str(), 2) == instance)
                    .count();
                assert_eq!(owned, expected);
                owned_total += owned;
            }
            PrimeOutcome::Skipped => panic!("fresh component skipped priming"),
        }
    }
    assert_eq!(owned_total, rooms.len());
}

/// Hydration waits out a slow database and serves later reads from memory
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_storage_single_hydration() {
    init_test_environment();
    let room = room_id!("!slow:example.org");
    let storage = Arc::new(MemoryStorage::new().with_delay(Duration::from_millis(150)));
    storage.insert_event(StreamEvent::new(text_event(room, 1, "only"), 1));
    let component =
        SyncCacheComponent::new(config(), storage.clone(), Arc::new(CountingRecorder::new())).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let repo = component.repo().clone();
            tokio::spawn(async move { repo.get_last_event(room_id!("!slow:example.org")).await })
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.await.unwrap().unwrap().offset, 1);
    }
    assert_eq!(storage.history_calls(), 1);
    assert_eq!(component.repo().loaded_data().timeline, 1);
}
