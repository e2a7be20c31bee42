//! Room coordinator: the single owner of all live rooms.
//!
//! Architecture:
//! ```text
//! inbound envelope
//!       │
//!       ▼
//! ProtocolAdapter ──► Coordinator ──► Room (per-room mutex)
//!                          │              │ transform + apply + append
//!                          │              ▼
//!                          │         broadcast::Sender<RoomEvent>
//!                          │              │
//!                          ▼              ▼
//!                     idle sweep     subscribers (independent receivers)
//! ```
//!
//! Concurrency model: the room table is behind an `RwLock` held only long
//! enough to clone a room handle, and each room's state sits behind its own
//! `Mutex`, so mutation is serialized **per room** while distinct rooms
//! proceed in parallel. The read-transform-append sequence in
//! [`Coordinator::apply_operation`] is the one critical section in the
//! system; everything it needs is pure and synchronous, so the lock is held
//! briefly and never across I/O.
//!
//! Fan-out uses one tokio broadcast channel per room. Every subscriber owns
//! an independent bounded queue: a slow consumer lags and drops on its own
//! receiver without stalling the accept path or any other subscriber.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::presence::{Presence, PresenceState, User};
use crate::room::Room;
use crate::storage::RoomStore;
use crate::transform::{transform, Operation};

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// The referenced room does not exist (it may have been destroyed
    /// concurrently). Non-fatal to the coordinator.
    RoomNotFound(String),
    /// `create_room` with an id that is already taken.
    RoomAlreadyExists(String),
    /// Structurally invalid operation; rejected before any transform and
    /// never entered in history.
    InvalidOperation(String),
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomNotFound(id) => write!(f, "Room not found: {id}"),
            Self::RoomAlreadyExists(id) => write!(f, "Room already exists: {id}"),
            Self::InvalidOperation(reason) => write!(f, "Invalid operation: {reason}"),
        }
    }
}

impl std::error::Error for CollabError {}

/// Events fanned out to room subscribers. Operations are broadcast in their
/// *transformed* form, the version that was actually applied.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Joined(User),
    Left { user_id: String },
    Operation(Operation),
    Presence { user_id: String, state: PresenceState },
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Rooms empty and inactive for longer than this are destroyed, and
    /// presence entries older than this are implicitly removed, by the sweep.
    pub idle_threshold: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
    /// Event buffer per subscriber before a lagging one starts dropping.
    pub broadcast_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            broadcast_capacity: 256,
        }
    }
}

/// Coordinator statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub rooms_created: u64,
    pub rooms_destroyed: u64,
    pub operations_accepted: u64,
    pub operations_rejected: u64,
    pub events_broadcast: u64,
    pub active_rooms: usize,
}

/// Lock-free counters; the hot paths never take a lock for bookkeeping.
struct AtomicStats {
    rooms_created: AtomicU64,
    rooms_destroyed: AtomicU64,
    operations_accepted: AtomicU64,
    operations_rejected: AtomicU64,
    events_broadcast: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            rooms_created: AtomicU64::new(0),
            rooms_destroyed: AtomicU64::new(0),
            operations_accepted: AtomicU64::new(0),
            operations_rejected: AtomicU64::new(0),
            events_broadcast: AtomicU64::new(0),
        }
    }
}

/// One live room: serialized state plus its fan-out channel.
struct RoomHandle {
    state: Mutex<Room>,
    events: broadcast::Sender<RoomEvent>,
}

/// The collaboration coordinator.
///
/// An explicit, constructible instance. Callers hold it in an `Arc` and
/// hand clones wherever needed; independent instances coexist freely (tests,
/// sharded deployments).
pub struct Coordinator {
    config: CoordinatorConfig,
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    store: Option<Arc<dyn RoomStore>>,
    stats: AtomicStats,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            store: None,
            stats: AtomicStats::new(),
        }
    }

    /// Create with default configuration and no persistence.
    pub fn with_defaults() -> Self {
        Self::new(CoordinatorConfig::default())
    }

    /// Create with a persistence hook. The store is offered snapshots on
    /// room destruction and consulted on room creation.
    pub fn with_store(config: CoordinatorConfig, store: Arc<dyn RoomStore>) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            store: Some(store),
            stats: AtomicStats::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Create a room. If a store is configured and holds a snapshot for
    /// this id, the room is restored from it and `seed` is ignored.
    pub async fn create_room(
        &self,
        id: &str,
        name: &str,
        seed: &str,
    ) -> Result<(), CollabError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(id) {
            return Err(CollabError::RoomAlreadyExists(id.to_string()));
        }

        let room = match self.load_snapshot(id) {
            Some(snapshot) => {
                log::info!("Room {id} restored from storage");
                Room::from_snapshot(snapshot)
            }
            None => Room::new(id, name, seed),
        };

        let (events, _) = broadcast::channel(self.config.broadcast_capacity);
        rooms.insert(
            id.to_string(),
            Arc::new(RoomHandle {
                state: Mutex::new(room),
                events,
            }),
        );
        self.stats.rooms_created.fetch_add(1, Ordering::Relaxed);
        log::info!("Room {id} ({name}) created");
        Ok(())
    }

    /// Explicitly destroy a room, offering its snapshot to the store.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), CollabError> {
        let mut rooms = self.rooms.write().await;
        let handle = rooms
            .remove(room_id)
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))?;
        let room = handle.state.lock().await;
        self.persist(&room);
        self.stats.rooms_destroyed.fetch_add(1, Ordering::Relaxed);
        log::info!("Room {room_id} deleted");
        Ok(())
    }

    /// Add a user to a room and initialize their presence. Idempotent for
    /// an already-joined user. Emits [`RoomEvent::Joined`] to subscribers.
    pub async fn join_room(&self, room_id: &str, user: User) -> Result<(), CollabError> {
        let handle = self.room_handle(room_id).await?;
        {
            let mut room = handle.state.lock().await;
            room.add_user(user.clone());
        }
        log::info!("User {} ({}) joined room {room_id}", user.display_name, user.id);
        self.emit(&handle, RoomEvent::Joined(user));
        Ok(())
    }

    /// Remove a user and their presence. A user that was never a member is
    /// a no-op, not an error. Emits [`RoomEvent::Left`] when someone
    /// actually left.
    pub async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<(), CollabError> {
        let handle = self.room_handle(room_id).await?;
        let removed = {
            let mut room = handle.state.lock().await;
            room.remove_user(user_id)
        };
        if removed {
            log::info!("User {user_id} left room {room_id}");
            self.emit(
                &handle,
                RoomEvent::Left {
                    user_id: user_id.to_string(),
                },
            );
        }
        Ok(())
    }

    /// The single write path for document edits.
    ///
    /// `based_on` is the last sequence number the submitting client had
    /// observed. The operation is transformed against every history entry
    /// accepted after that point, in ascending sequence order, then applied,
    /// appended, and broadcast in its transformed form. The whole
    /// read-transform-append step runs under the room's mutex.
    pub async fn apply_operation(
        &self,
        room_id: &str,
        op: Operation,
        based_on: u64,
    ) -> Result<Operation, CollabError> {
        if let Err(reason) = op.validate() {
            self.stats.operations_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CollabError::InvalidOperation(reason.to_string()));
        }
        let handle = self.room_handle(room_id).await?;

        let accepted = {
            let mut room = handle.state.lock().await;
            let transformed = room
                .operations_since(based_on)
                .iter()
                .fold(op, |acc, prior| transform(&acc, prior));
            room.accept(transformed)
        };

        self.stats.operations_accepted.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Room {room_id}: accepted seq {} from {} (based on {based_on})",
            accepted.sequence,
            accepted.author_id
        );
        self.emit(&handle, RoomEvent::Operation(accepted.clone()));
        Ok(accepted)
    }

    /// Overwrite a user's presence and broadcast it. A presence update for
    /// a room that no longer exists is logged and dropped, since it may
    /// have raced the room's destruction.
    pub async fn update_presence(&self, room_id: &str, user_id: &str, state: PresenceState) {
        let handle = {
            let rooms = self.rooms.read().await;
            rooms.get(room_id).cloned()
        };
        let Some(handle) = handle else {
            log::warn!("Presence update for unknown room {room_id} dropped");
            return;
        };
        {
            let mut room = handle.state.lock().await;
            room.update_presence(user_id, state);
        }
        log::trace!("Presence update from {user_id} in room {room_id}");
        self.emit(
            &handle,
            RoomEvent::Presence {
                user_id: user_id.to_string(),
                state,
            },
        );
    }

    /// Snapshot of the room's document.
    pub async fn get_document(&self, room_id: &str) -> Result<String, CollabError> {
        let handle = self.room_handle(room_id).await?;
        let room = handle.state.lock().await;
        Ok(room.document.clone())
    }

    /// Snapshot of the room's members.
    pub async fn get_users(&self, room_id: &str) -> Result<Vec<User>, CollabError> {
        let handle = self.room_handle(room_id).await?;
        let room = handle.state.lock().await;
        Ok(room.users.values().cloned().collect())
    }

    /// Snapshot of the room's presence table.
    pub async fn get_presence(&self, room_id: &str) -> Result<Vec<Presence>, CollabError> {
        let handle = self.room_handle(room_id).await?;
        let room = handle.state.lock().await;
        Ok(room.presence.values().cloned().collect())
    }

    /// Register for all broadcast events on a room. Dropping the receiver
    /// unsubscribes; each receiver is independent, so one subscriber's
    /// failure or backlog never affects another's delivery.
    pub async fn subscribe(
        &self,
        room_id: &str,
    ) -> Result<broadcast::Receiver<RoomEvent>, CollabError> {
        let handle = self.room_handle(room_id).await?;
        Ok(handle.events.subscribe())
    }

    /// Sweep every room: presence entries older than `idle_threshold` force
    /// an implicit leave, and rooms left empty and inactive past the
    /// threshold are destroyed (their snapshots offered to the store).
    /// Intended to run on a periodic interval; see [`Self::spawn_sweeper`].
    pub async fn cleanup(&self, idle_threshold: Duration) {
        let handles: Vec<(String, Arc<RoomHandle>)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        // Implicit leaves first, so membership reflects reality before the
        // destruction check.
        for (room_id, handle) in &handles {
            let evicted = {
                let mut room = handle.state.lock().await;
                let stale = room.stale_user_ids(idle_threshold);
                for user_id in &stale {
                    room.remove_user(user_id);
                }
                stale
            };
            for user_id in evicted {
                log::info!("User {user_id} timed out of room {room_id}");
                self.emit(handle, RoomEvent::Left { user_id });
            }
        }

        let mut rooms = self.rooms.write().await;
        for (room_id, handle) in &handles {
            if !rooms.contains_key(room_id) {
                continue; // destroyed concurrently
            }
            let destroy = {
                let room = handle.state.lock().await;
                if room.is_idle(idle_threshold) {
                    self.persist(&room);
                    true
                } else {
                    false
                }
            };
            if destroy {
                rooms.remove(room_id);
                self.stats.rooms_destroyed.fetch_add(1, Ordering::Relaxed);
                log::info!("Room {room_id} destroyed (idle)");
            }
        }
    }

    /// Spawn the periodic idle sweeper. The task runs until aborted.
    pub fn spawn_sweeper(coordinator: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.sweep_interval);
            loop {
                interval.tick().await;
                coordinator
                    .cleanup(coordinator.config.idle_threshold)
                    .await;
            }
        })
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Ids of all live rooms.
    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Coordinator statistics (lock-free counters plus the room count).
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            rooms_created: self.stats.rooms_created.load(Ordering::Relaxed),
            rooms_destroyed: self.stats.rooms_destroyed.load(Ordering::Relaxed),
            operations_accepted: self.stats.operations_accepted.load(Ordering::Relaxed),
            operations_rejected: self.stats.operations_rejected.load(Ordering::Relaxed),
            events_broadcast: self.stats.events_broadcast.load(Ordering::Relaxed),
            active_rooms: self.rooms.read().await.len(),
        }
    }

    async fn room_handle(&self, room_id: &str) -> Result<Arc<RoomHandle>, CollabError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))
    }

    /// Non-blocking fan-out; a send with no subscribers is fine.
    fn emit(&self, handle: &RoomHandle, event: RoomEvent) {
        let _ = handle.events.send(event);
        self.stats.events_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    fn load_snapshot(&self, room_id: &str) -> Option<crate::storage::RoomSnapshot> {
        let store = self.store.as_ref()?;
        match store.load_room(room_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Failed to load snapshot for room {room_id}: {e}");
                None
            }
        }
    }

    fn persist(&self, room: &Room) {
        let Some(store) = &self.store else { return };
        let snapshot = room.snapshot(now_ms());
        match store.save_room(&snapshot) {
            Ok(()) => log::info!("Persisted snapshot for room {}", room.id),
            Err(e) => log::error!("Failed to persist snapshot for room {}: {e}", room.id),
        }
    }
}

/// Wall-clock milliseconds for snapshot and envelope stamps. Never used for
/// ordering.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::OpKind;

    async fn room_with_user(coordinator: &Coordinator, room_id: &str, user_id: &str) {
        coordinator.create_room(room_id, room_id, "").await.unwrap();
        coordinator
            .join_room(room_id, User::with_id(user_id, user_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_duplicate_room_fails() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();
        let err = coordinator.create_room("r1", "Again", "").await.unwrap_err();
        assert_eq!(err, CollabError::RoomAlreadyExists("r1".to_string()));
    }

    #[tokio::test]
    async fn test_join_unknown_room_fails() {
        let coordinator = Coordinator::with_defaults();
        let err = coordinator
            .join_room("nope", User::with_id("alice", "Alice"))
            .await
            .unwrap_err();
        assert_eq!(err, CollabError::RoomNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_double_join_is_idempotent() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();
        coordinator
            .join_room("r1", User::with_id("alice", "Alice"))
            .await
            .unwrap();
        coordinator
            .join_room("r1", User::with_id("alice", "Alice"))
            .await
            .unwrap();
        let users = coordinator.get_users("r1").await.unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_without_membership_is_noop() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();
        coordinator.leave_room("r1", "ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_operation_sequences_and_applies() {
        let coordinator = Coordinator::with_defaults();
        room_with_user(&coordinator, "r1", "alice").await;

        let op = Operation::insert(0, "hello", "alice");
        let accepted = coordinator.apply_operation("r1", op, 0).await.unwrap();
        assert_eq!(accepted.sequence, 1);
        assert_eq!(coordinator.get_document("r1").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_apply_operation_transforms_against_concurrent() {
        let coordinator = Coordinator::with_defaults();
        coordinator
            .create_room("r1", "Room 1", "hello world")
            .await
            .unwrap();

        // Both clients observed sequence 0 and insert at position 5.
        let a = Operation::insert(5, " there", "alice");
        let b = Operation::insert(5, " you", "bob");
        coordinator.apply_operation("r1", a, 0).await.unwrap();
        let accepted_b = coordinator.apply_operation("r1", b, 0).await.unwrap();

        // bob's insert was shifted past alice's (alice wins the tie).
        assert_eq!(accepted_b.position, 11);
        assert_eq!(
            coordinator.get_document("r1").await.unwrap(),
            "hello there you world"
        );
    }

    #[tokio::test]
    async fn test_invalid_operation_rejected_before_history() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();

        let op = Operation {
            kind: OpKind::Insert,
            position: 0,
            content: None,
            length: None,
            author_id: "alice".into(),
            sequence: 0,
        };
        let err = coordinator.apply_operation("r1", op, 0).await.unwrap_err();
        assert!(matches!(err, CollabError::InvalidOperation(_)));

        let stats = coordinator.stats().await;
        assert_eq!(stats.operations_rejected, 1);
        assert_eq!(stats.operations_accepted, 0);
    }

    #[tokio::test]
    async fn test_operation_on_unknown_room_fails() {
        let coordinator = Coordinator::with_defaults();
        let op = Operation::insert(0, "x", "alice");
        let err = coordinator.apply_operation("nope", op, 0).await.unwrap_err();
        assert_eq!(err, CollabError::RoomNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_subscriber_receives_transformed_operation() {
        let coordinator = Coordinator::with_defaults();
        coordinator
            .create_room("r1", "Room 1", "hello world")
            .await
            .unwrap();
        let mut rx = coordinator.subscribe("r1").await.unwrap();

        coordinator
            .apply_operation("r1", Operation::insert(5, " there", "alice"), 0)
            .await
            .unwrap();
        coordinator
            .apply_operation("r1", Operation::insert(5, " you", "bob"), 0)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            RoomEvent::Operation(op) => assert_eq!(op.position, 5),
            other => panic!("Expected operation event, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            RoomEvent::Operation(op) => {
                assert_eq!(op.position, 11); // the transformed form, not the original
                assert_eq!(op.sequence, 2);
            }
            other => panic!("Expected operation event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_presence_update_unknown_room_is_dropped() {
        let coordinator = Coordinator::with_defaults();
        // must not panic or error
        coordinator
            .update_presence("nope", "alice", PresenceState::default())
            .await;
    }

    #[tokio::test]
    async fn test_cleanup_destroys_idle_empty_room() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.cleanup(Duration::from_millis(5)).await;
        assert_eq!(coordinator.room_count().await, 0);

        let stats = coordinator.stats().await;
        assert_eq!(stats.rooms_destroyed, 1);
    }

    #[tokio::test]
    async fn test_cleanup_spares_occupied_room() {
        let coordinator = Coordinator::with_defaults();
        room_with_user(&coordinator, "r1", "alice").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        // alice's presence is stale, so she is evicted; the room then has no
        // members but fresh activity from the eviction keeps it alive until
        // the next sweep.
        coordinator.cleanup(Duration::from_millis(20)).await;
        assert_eq!(coordinator.room_count().await, 1);
        assert!(coordinator.get_users("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_never_destroys_room_with_fresh_member() {
        let coordinator = Coordinator::with_defaults();
        room_with_user(&coordinator, "r1", "alice").await;

        coordinator.cleanup(Duration::from_secs(3600)).await;
        assert_eq!(coordinator.room_count().await, 1);
        assert_eq!(coordinator.get_users("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let coordinator = Arc::new(Coordinator::with_defaults());
        coordinator.create_room("r1", "Room 1", "").await.unwrap();
        coordinator.create_room("r2", "Room 2", "").await.unwrap();

        let mut tasks = Vec::new();
        for room_id in ["r1", "r2"] {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    coordinator
                        .apply_operation(
                            room_id,
                            Operation::insert(0, "x", "alice"),
                            i,
                        )
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(coordinator.get_document("r1").await.unwrap().len(), 50);
        assert_eq!(coordinator.get_document("r2").await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_stats_track_lifecycle() {
        let coordinator = Coordinator::with_defaults();
        coordinator.create_room("r1", "Room 1", "").await.unwrap();
        coordinator
            .apply_operation("r1", Operation::insert(0, "x", "alice"), 0)
            .await
            .unwrap();
        coordinator.delete_room("r1").await.unwrap();

        let stats = coordinator.stats().await;
        assert_eq!(stats.rooms_created, 1);
        assert_eq!(stats.rooms_destroyed, 1);
        assert_eq!(stats.operations_accepted, 1);
        assert_eq!(stats.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_room_fails() {
        let coordinator = Coordinator::with_defaults();
        let err = coordinator.delete_room("nope").await.unwrap_err();
        assert_eq!(err, CollabError::RoomNotFound("nope".to_string()));
    }
}
