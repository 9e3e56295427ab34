//! Wire protocol message definitions
//! Every frame on the wire is one JSON-encoded [`MessageTransport`].

use serde::{Deserialize, Serialize};

use crate::input::Input;
use crate::replication::{EntityState, ServerStats};
use crate::world::EntityId;

use super::ProtocolError;

/// Message kinds carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    AcceptConnection,
    GameStateUpdate,
    PlayerInput,
    CreateEntity,
    PlayerJoin,
    AckPlayerJoin,
    Ping,
    Rpc,
}

/// Envelope for every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTransport {
    /// Player id of the sender; 0 for the server.
    pub sender_id: u32,
    pub message_type: MessageType,
    /// Server global frame, or the client's local frame for inputs.
    pub command_frame: u32,
    /// Unix time in nanoseconds when the message was built.
    pub timestamp_ns: i64,
    pub body: MessageBody,
}

/// Typed message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageBody {
    AcceptConnection(AcceptConnectionMessage),
    GameStateUpdate(GameStateUpdateMessage),
    PlayerInput(InputMessage),
    CreateEntity(CreateEntityMessage),
    PlayerJoin,
    AckPlayerJoin(AckPlayerJoinMessage),
    Ping(PingMessage),
    Rpc(RpcMessage),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AcceptConnection(_) => MessageType::AcceptConnection,
            Self::GameStateUpdate(_) => MessageType::GameStateUpdate,
            Self::PlayerInput(_) => MessageType::PlayerInput,
            Self::CreateEntity(_) => MessageType::CreateEntity,
            Self::PlayerJoin => MessageType::PlayerJoin,
            Self::AckPlayerJoin(_) => MessageType::AckPlayerJoin,
            Self::Ping(_) => MessageType::Ping,
            Self::Rpc(_) => MessageType::Rpc,
        }
    }
}

impl MessageTransport {
    pub fn new(sender_id: u32, command_frame: u32, timestamp_ns: i64, body: MessageBody) -> Self {
        Self {
            sender_id,
            message_type: body.message_type(),
            command_frame,
            timestamp_ns,
            body,
        }
    }

    /// Reject envelopes whose declared type disagrees with the body.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let actual = self.body.message_type();
        if actual != self.message_type {
            return Err(ProtocolError::TypeMismatch {
                declared: self.message_type,
                actual,
            });
        }
        Ok(())
    }
}

/// Sent by the server right after accepting a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptConnectionMessage {
    pub player_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub input: Input,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPlayerJoinMessage {
    pub project_name: String,
    pub player_id: u32,
    pub player_entity_id: EntityId,
    pub camera_entity_id: EntityId,
    /// JSON world document.
    #[serde(with = "base64_bytes")]
    pub serialized_world: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityMessage {
    /// Player whose join created the entity.
    pub owner_id: u32,
    /// JSON entity record.
    #[serde(with = "base64_bytes")]
    pub entity_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateUpdateMessage {
    pub entity_states: Vec<EntityState>,
    #[serde(default)]
    pub destroyed_entities: Vec<EntityId>,
    pub global_command_frame: u32,
    #[serde(default)]
    pub server_stats: ServerStats,
    /// Last local command frame of the receiving player that the server has
    /// simulated.
    #[serde(default)]
    pub last_input_command_frame: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingMessage {
    pub unix_time_ns: i64,
}

/// Console-style command, e.g. `respawn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    pub command: String,
}

/// Base64 (standard alphabet) encoding for byte fields.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
