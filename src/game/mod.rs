//! Game simulation modules

pub mod behaviour;
pub mod client;
pub mod frame;
pub mod server;

pub use client::{Client, ClientState, ClientSystem};
pub use frame::{CommandFrameLoop, MAX_COMMAND_FRAMES_PER_LOOP, MS_PER_COMMAND_FRAME, MS_PER_GAME_STATE_UPDATE};
pub use server::{PlayerSession, Server, ServerState, ServerSystem};
