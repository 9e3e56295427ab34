//! Client-side interpolation between server snapshots
//!
//! Each snapshot after the first expands into `Δglobal_cf + 1` interpolation
//! frames lerped from the previous end state. The client consumes one frame
//! per command frame. Frame numbers form a single increasing sequence across
//! snapshots, so a consumer never sees a frame twice.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::math::{lerp, nlerp, Quat, Vec3};
use crate::net::protocol::GameStateUpdateMessage;
use crate::world::{EntityId, World};

/// Default ring capacity.
pub const MAX_STATE_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedState {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub deadge: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationFrame {
    pub command_frame: u32,
    pub states: Vec<InterpolatedState>,
}

type Pose = (Vec3, Quat);

#[derive(Debug)]
pub struct StateBuffer {
    frames: VecDeque<InterpolationFrame>,
    capacity: usize,
    latest: Option<GameStateUpdateMessage>,
    next_frame: u32,
    last_pulled: Option<u32>,
}

impl Default for StateBuffer {
    fn default() -> Self {
        Self::new(MAX_STATE_BUFFER_SIZE)
    }
}

impl StateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            latest: None,
            next_frame: 0,
            last_pulled: None,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Most recently accepted snapshot.
    pub fn latest(&self) -> Option<&GameStateUpdateMessage> {
        self.latest.as_ref()
    }

    /// Accept a snapshot and synthesize its interpolation frames. Returns the
    /// number of frames pushed. Snapshots that are not newer than the last
    /// accepted one are dropped.
    ///
    /// # Panics
    ///
    /// Panics if the new frames do not fit in the ring.
    pub fn push(&mut self, update: GameStateUpdateMessage) -> usize {
        let Some(prev) = &self.latest else {
            self.next_frame = update.global_command_frame.wrapping_add(1);
            self.latest = Some(update);
            return 0;
        };
        if update.global_command_frame <= prev.global_command_frame {
            warn!(
                frame = update.global_command_frame,
                latest = prev.global_command_frame,
                "Dropping stale snapshot"
            );
            return 0;
        }

        let n = (update.global_command_frame - prev.global_command_frame) as usize + 1;
        if self.frames.len() + n > self.capacity {
            panic!(
                "state buffer overflow: {} buffered + {} incoming exceeds capacity {}",
                self.frames.len(),
                n,
                self.capacity
            );
        }

        let start: BTreeMap<EntityId, Pose> = match self.frames.back() {
            Some(frame) => frame
                .states
                .iter()
                .filter(|s| !s.deadge)
                .map(|s| (s.id, (s.position, s.rotation)))
                .collect(),
            None => prev
                .entity_states
                .iter()
                .map(|s| (s.id, (s.position, s.rotation)))
                .collect(),
        };
        let end: BTreeMap<EntityId, Pose> = update
            .entity_states
            .iter()
            .map(|s| (s.id, (s.position, s.rotation)))
            .collect();
        let destroyed: BTreeSet<EntityId> = update.destroyed_entities.iter().copied().collect();
        let ids: BTreeSet<EntityId> = start
            .keys()
            .chain(end.keys())
            .copied()
            .filter(|id| !destroyed.contains(id))
            .collect();

        for i in 1..=n {
            let t = i as f64 / n as f64;
            let mut states: Vec<InterpolatedState> = ids
                .iter()
                .filter_map(|id| {
                    let from = start.get(id).or_else(|| end.get(id))?;
                    let to = end.get(id).unwrap_or(from);
                    Some(InterpolatedState {
                        id: *id,
                        position: lerp(from.0, to.0, t),
                        rotation: nlerp(from.1, to.1, t),
                        deadge: false,
                    })
                })
                .collect();
            if i == n {
                states.extend(destroyed.iter().map(|&id| InterpolatedState {
                    id,
                    position: Vec3::ZERO,
                    rotation: Quat::IDENTITY,
                    deadge: true,
                }));
            }
            self.frames.push_back(InterpolationFrame {
                command_frame: self.next_frame,
                states,
            });
            self.next_frame = self.next_frame.wrapping_add(1);
        }

        debug!(frames = n, buffered = self.frames.len(), "Buffered snapshot");
        self.latest = Some(update);
        n
    }

    /// Oldest unconsumed frame.
    pub fn pull(&mut self) -> Option<InterpolationFrame> {
        let frame = self.frames.pop_front()?;
        debug_assert!(self.last_pulled.map_or(true, |last| frame.command_frame > last));
        self.last_pulled = Some(frame.command_frame);
        Some(frame)
    }
}

/// Apply an interpolation frame: move live entities and delete dead ones.
/// `skip` is left untouched (the locally predicted avatar). Returns the
/// deleted ids.
pub fn apply_frame(world: &mut World, frame: &InterpolationFrame, skip: Option<EntityId>) -> Vec<EntityId> {
    let mut deleted = Vec::new();
    for state in &frame.states {
        if Some(state.id) == skip {
            continue;
        }
        if state.deadge {
            if world.delete_entity(state.id).is_some() {
                deleted.push(state.id);
            }
            continue;
        }
        if world.contains(state.id) {
            world.set_local_position(state.id, state.position);
            world.set_local_rotation(state.id, state.rotation);
            world.index_entity(state.id);
        }
    }
    deleted
}
