//! World persistence

pub mod world_file;

pub use world_file::{
    entity_bytes, entity_from_bytes, load_world, reload_world, save_world, world_bytes, world_from_bytes,
    SerializedWorld, StoreError,
};
