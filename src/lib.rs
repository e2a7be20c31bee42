//! # textroom — room-based collaborative text editing
//!
//! Concurrent plain-text editing with convergence: every client applies the
//! same operations in the same server-decided order, and concurrent edits
//! are rewritten against each other with operational transforms so all
//! replicas end on an identical document.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  envelopes   ┌─────────────────┐
//! │ Transport │ ◄──────────► │ ProtocolAdapter │
//! │ (external)│              └────────┬────────┘
//! └───────────┘                       │
//!                                     ▼
//!                             ┌───────────────┐
//!                             │  Coordinator  │
//!                             └───────┬───────┘
//!                      ┌──────────────┼──────────────┐
//!                      ▼              ▼              ▼
//!                 ┌─────────┐    ┌─────────┐    ┌─────────┐
//!                 │ Room A  │    │ Room B  │    │ Room C  │
//!                 │ doc     │    │ doc     │    │ doc     │
//!                 │ history │    │ history │    │ history │
//!                 │ presence│    │ presence│    │ presence│
//!                 └────┬────┘    └─────────┘    └─────────┘
//!                      │ transform + apply (pure)
//!                      ▼
//!                 broadcast to subscribers
//! ```
//!
//! ## Modules
//!
//! - [`transform`] — pure OT engine: `transform`, `apply`, `compose`
//! - [`room`] — document + history + membership for one session
//! - [`coordinator`] — room lifecycle, the serialized write path, fan-out,
//!   idle sweep
//! - [`protocol`] — binary wire envelopes and the transport-facing adapter
//! - [`presence`] — users, deterministic colors, cursor/selection state
//! - [`storage`] — snapshot persistence hooks (`RoomStore`)
//!
//! Ordering within a room comes from a server-assigned sequence counter,
//! never from client clocks; clients submit the last sequence they saw and
//! the coordinator transforms their edit against everything newer.

pub mod coordinator;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use coordinator::{
    CollabError, Coordinator, CoordinatorConfig, CoordinatorStats, RoomEvent,
};
pub use presence::{CursorPos, Presence, PresenceState, SelectionRange, User, UserColor};
pub use protocol::{Envelope, MessageBody, OperationPayload, ProtocolAdapter, ProtocolError};
pub use room::Room;
pub use storage::{MemoryStore, RoomSnapshot, RoomStore, StoreError};
pub use transform::{apply, compose, transform, OpKind, Operation};
