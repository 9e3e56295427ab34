//! State replication: server snapshots, client interpolation and
//! prediction replay

pub mod prediction;
pub mod snapshot;
pub mod state_buffer;

pub use prediction::{HistoryEntry, PredictionError, PredictionHistory, MAX_COMMAND_FRAME_BUFFER_SIZE};
pub use snapshot::{
    apply_entity_state, capture_entity_states, entity_state, EntityState, ReplicationAccumulator, ServerStats,
};
pub use state_buffer::{apply_frame, InterpolatedState, InterpolationFrame, StateBuffer, MAX_STATE_BUFFER_SIZE};
