//! Binary protocol between room providers and the room server.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ room     │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ len+utf8 │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Document payloads are raw yrs v1 updates or state vectors. Presence
//! payloads are JSON so browser peers can read them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::presence::PresenceUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client state vector; asks the server for the missing diff
    Join = 1,
    /// Server diff answering a join. Doubles as the "synced" signal.
    SyncStep2 = 2,
    /// Incremental document update
    Update = 3,
    /// Presence delta for one session
    Presence = 4,
    /// A session's socket closed
    PeerLeft = 5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub room: String,
    /// Sender-local counter; presence uses it to drop stale deltas
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    pub fn join(peer_id: Uuid, room: impl Into<String>, state_vector: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Join,
            peer_id,
            room: room.into(),
            clock: 0,
            payload: state_vector,
        }
    }

    pub fn sync_step2(peer_id: Uuid, room: impl Into<String>, diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep2,
            peer_id,
            room: room.into(),
            clock: 0,
            payload: diff,
        }
    }

    pub fn update(peer_id: Uuid, room: impl Into<String>, clock: u64, update: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            peer_id,
            room: room.into(),
            clock,
            payload: update,
        }
    }

    pub fn presence(
        room: impl Into<String>,
        update: &PresenceUpdate,
    ) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(update)
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::Presence,
            peer_id: update.session,
            room: room.into(),
            clock: update.clock,
            payload,
        })
    }

    pub fn peer_left(peer_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::PeerLeft,
            peer_id,
            room: room.into(),
            clock: 0,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse a presence payload.
    pub fn presence_update(&self) -> Result<PresenceUpdate, ProtocolError> {
        if self.msg_type != MessageType::Presence {
            return Err(ProtocolError::InvalidMessageType);
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("deserialization error: {0}")]
    DeserializationError(String),
    #[error("invalid message type")]
    InvalidMessageType,
}
