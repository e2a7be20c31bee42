//! Persistence hooks for room snapshots.
//!
//! Durable storage is an external collaborator: the coordinator offers a
//! room's state to a [`RoomStore`] on destruction and asks it for one on
//! creation, and has no opinion on the backend. [`MemoryStore`] is the
//! in-process reference implementation used by tests; real deployments plug
//! in their own backend behind the same trait.
//!
//! Snapshots travel as bincode bytes so a backend only ever handles opaque
//! blobs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::transform::Operation;

/// Persistable view of a room: identity, document, and accepted history.
/// Membership and presence are ephemeral and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    pub document: String,
    pub seed: String,
    pub history: Vec<Operation>,
    /// Wall-clock save time in unix milliseconds. Informational only;
    /// ordering inside a room always comes from operation sequences.
    pub saved_at_ms: u64,
}

impl RoomSnapshot {
    /// Serialize to the binary form handed to storage backends.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Deserialize from the binary form.
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (snapshot, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    Encode(String),
    Decode(String),
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Snapshot encode error: {e}"),
            Self::Decode(e) => write!(f, "Snapshot decode error: {e}"),
            Self::Backend(e) => write!(f, "Storage backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Hook trait the coordinator calls on room creation and destruction.
///
/// Implementations must be cheap enough to call inline from the lifecycle
/// paths, or hand off internally to their own workers.
pub trait RoomStore: Send + Sync {
    /// Persist a room snapshot, replacing any previous one for the same id.
    fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError>;

    /// Load the snapshot for a room id, `None` if nothing was persisted.
    fn load_room(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError>;

    /// Ids of every persisted room.
    fn list_rooms(&self) -> Result<Vec<String>, StoreError>;

    /// Drop the persisted snapshot for a room id (no-op if absent).
    fn remove_room(&self, room_id: &str) -> Result<(), StoreError>;
}

/// In-memory `RoomStore` backed by a map of encoded snapshots.
#[derive(Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted snapshots.
    pub fn len(&self) -> usize {
        self.rooms.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RoomStore for MemoryStore {
    fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let bytes = snapshot.encode()?;
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rooms.insert(snapshot.id.clone(), bytes);
        Ok(())
    }

    fn load_room(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        let rooms = self
            .rooms
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match rooms.get(room_id) {
            Some(bytes) => Ok(Some(RoomSnapshot::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn list_rooms(&self) -> Result<Vec<String>, StoreError> {
        let rooms = self
            .rooms
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(rooms.keys().cloned().collect())
    }

    fn remove_room(&self, room_id: &str) -> Result<(), StoreError> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rooms.remove(room_id);
        Ok(())
    }
}
