//! Simcore - fixed-step simulation core for an authoritative multiplayer 3D world
//!
//! The server owns the world and advances it in fixed command frames,
//! replicating snapshots to clients over framed JSON on TCP. Clients predict
//! their own avatar and interpolate everything else.

pub mod app;
pub mod collider;
pub mod collision;
pub mod config;
pub mod events;
pub mod game;
pub mod http;
pub mod input;
pub mod math;
pub mod navmesh;
pub mod net;
pub mod physics;
pub mod replication;
pub mod store;
pub mod util;
pub mod world;
