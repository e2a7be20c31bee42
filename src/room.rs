//! Room state: one shared document, its accepted-operation history, and the
//! membership/presence tables for a single collaborative session.
//!
//! Invariants maintained here:
//! - `document` always equals `seed` with every `history` entry applied in
//!   `sequence` order (`replay()` recomputes it for verification);
//! - `history` is append-only, entries are already transformed, and
//!   `sequence` numbers are dense: entry `i` carries sequence `i + 1`;
//! - membership is keyed by user id, so joining twice is idempotent.
//!
//! Lifecycle: `active` while members remain or activity is recent; once the
//! last member leaves the idle clock (`last_activity`) starts, and the
//! coordinator destroys the room after it exceeds the idle threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::presence::{Presence, PresenceState, User};
use crate::storage::RoomSnapshot;
use crate::transform::{apply, Operation};

/// One collaborative session. All mutation goes through the coordinator,
/// which serializes access per room.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// The single authoritative document. Never lazily diffed from history.
    pub document: String,
    /// The document the room started from; replaying `history` onto it must
    /// reproduce `document` exactly.
    pub seed: String,
    /// Accepted operations in sequence order. Append-only.
    pub history: Vec<Operation>,
    pub users: HashMap<String, User>,
    pub presence: HashMap<String, Presence>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>, seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let now = Instant::now();
        Self {
            id: id.into(),
            name: name.into(),
            document: seed.clone(),
            seed,
            history: Vec::new(),
            users: HashMap::new(),
            presence: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Restore a previously persisted room. Membership and presence are
    /// ephemeral and start empty.
    pub fn from_snapshot(snapshot: RoomSnapshot) -> Self {
        let now = Instant::now();
        Self {
            id: snapshot.id,
            name: snapshot.name,
            document: snapshot.document,
            seed: snapshot.seed,
            history: snapshot.history,
            users: HashMap::new(),
            presence: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// The sequence number the next accepted operation will receive.
    pub fn next_sequence(&self) -> u64 {
        self.history.len() as u64 + 1
    }

    /// History entries accepted after the given sequence number, in
    /// ascending order: the set an incoming operation must be transformed
    /// against. A `since` beyond the current head yields an empty slice.
    pub fn operations_since(&self, since: u64) -> &[Operation] {
        let start = (since as usize).min(self.history.len());
        &self.history[start..]
    }

    /// Accept an already-transformed operation: assign the next sequence,
    /// apply it to the document, append it to history, and stamp activity.
    /// Returns a clone of the accepted entry for broadcasting.
    pub fn accept(&mut self, mut op: Operation) -> Operation {
        op.sequence = self.next_sequence();
        self.document = apply(&self.document, &op);
        self.history.push(op.clone());
        self.touch();
        op
    }

    /// Add a member and initialize their presence. Idempotent: re-joining
    /// refreshes the entries rather than duplicating them.
    pub fn add_user(&mut self, user: User) {
        self.presence
            .entry(user.id.clone())
            .or_insert_with(|| Presence::new(user.id.clone()))
            .last_seen = Instant::now();
        self.users.insert(user.id.clone(), user);
        self.touch();
    }

    /// Remove a member and their presence. Returns false if the user was
    /// not a member (callers treat that as a no-op, not an error).
    pub fn remove_user(&mut self, user_id: &str) -> bool {
        self.presence.remove(user_id);
        let removed = self.users.remove(user_id).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    /// Overwrite a user's presence entry (last write wins) and stamp
    /// activity.
    pub fn update_presence(&mut self, user_id: &str, state: PresenceState) {
        self.presence
            .entry(user_id.to_string())
            .or_insert_with(|| Presence::new(user_id))
            .update(state);
        self.touch();
    }

    /// User ids whose presence has not been refreshed within `threshold`.
    pub fn stale_user_ids(&self, threshold: Duration) -> Vec<String> {
        self.presence
            .values()
            .filter(|p| p.is_stale(threshold))
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// An empty room whose last activity is older than `threshold` is ready
    /// for destruction. A room with any member is never idle.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.is_empty() && self.last_activity.elapsed() > threshold
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Recompute the document by replaying history onto the seed. Equality
    /// with `document` is the core integrity property; exercised by tests
    /// after every kind of mutation.
    pub fn replay(&self) -> String {
        self.history
            .iter()
            .fold(self.seed.clone(), |doc, op| apply(&doc, op))
    }

    /// Persistable view of this room: document, history, and identity, but
    /// not the ephemeral membership and presence tables.
    pub fn snapshot(&self, saved_at_ms: u64) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            document: self.document.clone(),
            seed: self.seed.clone(),
            history: self.history.clone(),
            saved_at_ms,
        }
    }
}
