//! Transport: framed JSON messages over TCP

pub mod codec;
pub mod connection;
pub mod protocol;

use std::time::Duration;

pub use codec::{decode_frame, encode_frame, read_message, write_message, MAX_FRAME_LEN};
pub use connection::{accept_loop, connect, spawn_link, Inbound, LinkOptions, PlayerLink, FIRST_PLAYER_ID};
pub use protocol::{
    AcceptConnectionMessage, AckPlayerJoinMessage, CreateEntityMessage, GameStateUpdateMessage, InputMessage, MessageBody,
    MessageTransport, MessageType, PingMessage, RpcMessage,
};

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Stream ended inside a frame ({0} bytes buffered)")]
    TruncatedFrame(usize),

    #[error("Envelope declares {declared:?} but carries {actual:?}")]
    TypeMismatch {
        declared: MessageType,
        actual: MessageType,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}
