//! Snapshot persistence tests: rooms offered to the store on destruction
//! and restored from it on creation.

use std::sync::Arc;
use textroom::transform::Operation;
use textroom::{Coordinator, CoordinatorConfig, MemoryStore, RoomStore, User};
use tokio::time::Duration;

fn coordinator_with_store(store: Arc<MemoryStore>) -> Coordinator {
    Coordinator::with_store(CoordinatorConfig::default(), store)
}

#[tokio::test]
async fn test_deleted_room_is_persisted() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone());

    coordinator.create_room("r1", "One", "hello").await.unwrap();
    coordinator
        .apply_operation("r1", Operation::insert(5, " world", "alice"), 0)
        .await
        .unwrap();
    coordinator.delete_room("r1").await.unwrap();

    let snapshot = store.load_room("r1").unwrap().unwrap();
    assert_eq!(snapshot.document, "hello world");
    assert_eq!(snapshot.seed, "hello");
    assert_eq!(snapshot.history.len(), 1);
}

#[tokio::test]
async fn test_create_restores_persisted_room() {
    let store = Arc::new(MemoryStore::new());
    {
        let coordinator = coordinator_with_store(store.clone());
        coordinator.create_room("r1", "One", "").await.unwrap();
        coordinator
            .apply_operation("r1", Operation::insert(0, "draft", "alice"), 0)
            .await
            .unwrap();
        coordinator.delete_room("r1").await.unwrap();
    }

    // a separate coordinator instance sharing only the store
    let coordinator = coordinator_with_store(store);
    coordinator
        .create_room("r1", "One", "ignored seed")
        .await
        .unwrap();

    assert_eq!(coordinator.get_document("r1").await.unwrap(), "draft");

    // sequences continue from the restored history
    let accepted = coordinator
        .apply_operation("r1", Operation::insert(5, "!", "bob"), 1)
        .await
        .unwrap();
    assert_eq!(accepted.sequence, 2);
    assert_eq!(coordinator.get_document("r1").await.unwrap(), "draft!");
}

#[tokio::test]
async fn test_sweep_persists_destroyed_rooms() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone());

    coordinator.create_room("r1", "One", "kept").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.cleanup(Duration::from_millis(5)).await;

    assert_eq!(coordinator.room_count().await, 0);
    let snapshot = store.load_room("r1").unwrap().unwrap();
    assert_eq!(snapshot.document, "kept");
}

#[tokio::test]
async fn test_membership_is_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone());

    coordinator.create_room("r1", "One", "").await.unwrap();
    coordinator
        .join_room("r1", User::with_id("alice", "Alice"))
        .await
        .unwrap();
    coordinator.delete_room("r1").await.unwrap();

    let coordinator = coordinator_with_store(store);
    coordinator.create_room("r1", "One", "").await.unwrap();
    assert!(coordinator.get_users("r1").await.unwrap().is_empty());
    assert!(coordinator.get_presence("r1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_coordinator_without_store_never_persists() {
    let coordinator = Coordinator::with_defaults();
    coordinator.create_room("r1", "One", "data").await.unwrap();
    coordinator.delete_room("r1").await.unwrap();

    // recreate: nothing restored, seed wins
    coordinator.create_room("r1", "One", "fresh").await.unwrap();
    assert_eq!(coordinator.get_document("r1").await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_store_keeps_latest_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator_with_store(store.clone());

    coordinator.create_room("r1", "One", "v1").await.unwrap();
    coordinator.delete_room("r1").await.unwrap();

    coordinator.create_room("r1", "One", "unused").await.unwrap();
    coordinator
        .apply_operation("r1", Operation::insert(2, "!", "alice"), 0)
        .await
        .unwrap();
    coordinator.delete_room("r1").await.unwrap();

    let snapshot = store.load_room("r1").unwrap().unwrap();
    assert_eq!(snapshot.document, "v1!");
    assert_eq!(store.len(), 1);
}
