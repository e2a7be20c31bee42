//! Wire envelope codec and the protocol adapter.
//!
//! This is the only module that touches the wire format. Inbound bytes are
//! decoded into an [`Envelope`] whose payload is a tagged union: a payload
//! that does not match its message type is unrepresentable after decode, so
//! nothing malformed ever reaches the coordinator. Outbound room events are
//! wrapped back into envelopes for the transport layer.
//!
//! The adapter holds no per-connection state: room membership, not
//! connection identity, decides who belongs where. Delivering outbound
//! envelopes to the right clients (and skipping the author to avoid echo)
//! is the transport's job.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::coordinator::{now_ms, CollabError, Coordinator, RoomEvent};
use crate::presence::{PresenceState, User};
use crate::transform::{OpKind, Operation};

/// Wire form of an edit. `based_on` matters inbound (the last sequence the
/// client observed); `sequence` matters outbound (assigned at acceptance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPayload {
    pub kind: OpKind,
    pub position: usize,
    pub content: Option<String>,
    pub length: Option<usize>,
    pub based_on: u64,
    pub sequence: u64,
}

impl OperationPayload {
    /// Outbound view of an accepted operation.
    pub fn from_operation(op: &Operation) -> Self {
        Self {
            kind: op.kind,
            position: op.position,
            content: op.content.clone(),
            length: op.length,
            based_on: 0,
            sequence: op.sequence,
        }
    }

    /// Inbound conversion; the author is the envelope's sender, never a
    /// payload field a client could spoof for someone else.
    pub fn into_operation(self, author_id: &str) -> Operation {
        Operation {
            kind: self.kind,
            position: self.position,
            content: self.content,
            length: self.length,
            author_id: author_id.to_string(),
            sequence: 0,
        }
    }
}

/// Typed message payload. The variant is the message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBody {
    Join(User),
    Leave,
    Operation(OperationPayload),
    Presence(PresenceState),
}

/// Top-level wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room_id: String,
    pub user_id: String,
    /// Wall-clock unix milliseconds at send time. Informational only;
    /// ordering always comes from operation sequences.
    pub timestamp: u64,
    pub body: MessageBody,
}

impl Envelope {
    pub fn join(room_id: impl Into<String>, user: User) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user.id.clone(),
            timestamp: now_ms(),
            body: MessageBody::Join(user),
        }
    }

    pub fn leave(room_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            timestamp: now_ms(),
            body: MessageBody::Leave,
        }
    }

    pub fn operation(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: OperationPayload,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            timestamp: now_ms(),
            body: MessageBody::Operation(payload),
        }
    }

    pub fn presence(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        state: PresenceState,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            timestamp: now_ms(),
            body: MessageBody::Presence(state),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(envelope)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Stateless translator between wire envelopes and coordinator calls.
pub struct ProtocolAdapter {
    coordinator: Arc<Coordinator>,
}

impl ProtocolAdapter {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Decode raw bytes and dispatch. Undecodable input is logged and
    /// dropped; a garbled frame must never take the pipeline down.
    pub async fn handle_raw(&self, bytes: &[u8]) -> Result<(), CollabError> {
        match Envelope::decode(bytes) {
            Ok(envelope) => self.handle_message(envelope).await,
            Err(e) => {
                log::warn!("Dropping undecodable message: {e}");
                Ok(())
            }
        }
    }

    /// Dispatch one envelope to the coordinator.
    ///
    /// A join for a room that does not exist yet creates it (first join
    /// creates the room). Leave/operation/presence against a room that is
    /// gone are logged and dropped, since they may have raced its
    /// destruction.
    /// Structurally invalid operations surface as `InvalidOperation`.
    pub async fn handle_message(&self, envelope: Envelope) -> Result<(), CollabError> {
        let Envelope {
            room_id,
            user_id,
            body,
            ..
        } = envelope;
        match body {
            MessageBody::Join(user) => {
                match self.coordinator.join_room(&room_id, user.clone()).await {
                    Err(CollabError::RoomNotFound(_)) => {
                        match self.coordinator.create_room(&room_id, &room_id, "").await {
                            // lost a create race: the room exists now either way
                            Ok(()) | Err(CollabError::RoomAlreadyExists(_)) => {}
                            Err(e) => return Err(e),
                        }
                        self.coordinator.join_room(&room_id, user).await
                    }
                    other => other,
                }
            }
            MessageBody::Leave => {
                match self.coordinator.leave_room(&room_id, &user_id).await {
                    Err(CollabError::RoomNotFound(_)) => {
                        log::warn!("Leave for unknown room {room_id} dropped");
                        Ok(())
                    }
                    other => other,
                }
            }
            MessageBody::Operation(payload) => {
                let based_on = payload.based_on;
                let op = payload.into_operation(&user_id);
                match self.coordinator.apply_operation(&room_id, op, based_on).await {
                    Ok(_) => Ok(()),
                    Err(CollabError::RoomNotFound(_)) => {
                        log::warn!("Operation for unknown room {room_id} dropped");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            MessageBody::Presence(state) => {
                self.coordinator
                    .update_presence(&room_id, &user_id, state)
                    .await;
                Ok(())
            }
        }
    }

    /// Wrap a room event into an outbound envelope for the transport layer.
    pub fn build_message(room_id: &str, event: &RoomEvent) -> Envelope {
        match event {
            RoomEvent::Joined(user) => Envelope::join(room_id, user.clone()),
            RoomEvent::Left { user_id } => Envelope::leave(room_id, user_id.clone()),
            RoomEvent::Operation(op) => Envelope::operation(
                room_id,
                op.author_id.clone(),
                OperationPayload::from_operation(op),
            ),
            RoomEvent::Presence { user_id, state } => {
                Envelope::presence(room_id, user_id.clone(), *state)
            }
        }
    }
}
