//! Client-side prediction history and server reconciliation

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::game::behaviour::drive;
use crate::input::Input;
use crate::physics::{kinematic_step, PhysicsSettings};
use crate::world::{EntityId, World};

use super::snapshot::{apply_entity_state, entity_state, EntityState};

/// Default history length in command frames.
pub const MAX_COMMAND_FRAME_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub frame_number: u32,
    pub frame_input: Input,
    pub post_cf_state: EntityState,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PredictionError {
    #[error("command frame {0} is no longer in the prediction history")]
    UnknownFrame(u32),

    #[error("predicted entity {0} is missing from the world")]
    MissingEntity(EntityId),
}

/// Ring of the local player's recent inputs and resulting states.
#[derive(Debug)]
pub struct PredictionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for PredictionHistory {
    fn default() -> Self {
        Self::new(MAX_COMMAND_FRAME_BUFFER_SIZE)
    }
}

impl PredictionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, frame_number: u32) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.frame_number == frame_number)
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Append the outcome of a locally simulated frame.
    ///
    /// A full ring evicts its oldest entry instead of panicking. An evicted
    /// frame is older than anything the server can still usefully
    /// acknowledge, and an ack for it takes the same path as any unknown
    /// frame: [`PredictionError::UnknownFrame`], and the snapshot is not
    /// replayed.
    pub fn record(&mut self, frame_number: u32, frame_input: Input, post_cf_state: EntityState) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            frame_number,
            frame_input,
            post_cf_state,
        });
    }

    /// Rewind the avatar to the server's state for `ack_frame` and replay
    /// every later input on top of it, rewriting their post-states. Entries
    /// before the acknowledged one are dropped. Returns the number of frames
    /// replayed.
    pub fn reconcile(
        &mut self,
        world: &mut World,
        avatar: EntityId,
        server: &EntityState,
        ack_frame: u32,
        dt_ms: f64,
        settings: &PhysicsSettings,
    ) -> Result<usize, PredictionError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.frame_number == ack_frame)
            .ok_or(PredictionError::UnknownFrame(ack_frame))?;

        let server = EntityState {
            id: avatar,
            ..server.clone()
        };
        if !apply_entity_state(world, &server) {
            return Err(PredictionError::MissingEntity(avatar));
        }
        self.entries.drain(..index);
        self.entries[0].post_cf_state = server;

        let dt = dt_ms / 1000.0;
        for entry in self.entries.iter_mut().skip(1) {
            drive(world, avatar, &entry.frame_input);
            kinematic_step(world, avatar, dt, settings);
            entry.post_cf_state = entity_state(world, avatar).ok_or(PredictionError::MissingEntity(avatar))?;
            trace!(frame = entry.frame_number, position = ?entry.post_cf_state.position, "Replayed frame");
        }

        let replayed = self.entries.len() - 1;
        debug!(ack_frame, replayed, "Reconciled prediction");
        Ok(replayed)
    }
}
