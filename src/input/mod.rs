//! Player input and the per-player input buffer
//!
//! The server receives inputs tagged with the client's local command frame.
//! Each simulation frame pulls exactly one input per player; when a player's
//! queue runs dry the last input is repeated and flagged stale.

pub mod source;

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::math::{Quat, Vec3, FORWARD};

pub use source::{IdleInput, InputSource, ScriptedInput, WanderInput};

/// Keys the simulation reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    W,
    A,
    S,
    D,
    Space,
    LeftShift,
    LeftControl,
}

/// Snapshot of the input devices for one command frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub keys: BTreeSet<Key>,
    #[serde(default)]
    pub camera_rotation: Quat,
}

impl Input {
    pub fn with_keys<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            camera_rotation: Quat::IDENTITY,
        }
    }

    pub fn pressed(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }

    /// Movement direction in camera space from WASD: -Z forward, +X right.
    pub fn movement_axes(&self) -> Vec3 {
        let mut v = Vec3::ZERO;
        if self.pressed(Key::W) {
            v += FORWARD;
        }
        if self.pressed(Key::S) {
            v -= FORWARD;
        }
        if self.pressed(Key::D) {
            v += Vec3::X;
        }
        if self.pressed(Key::A) {
            v -= Vec3::X;
        }
        v
    }
}

/// One buffered input, stamped with the client's command frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedInput {
    pub local_command_frame: u32,
    pub input: Input,
}

/// Result of pulling the next input for a player.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledInput {
    pub local_command_frame: u32,
    pub input: Input,
    /// True when the queue was empty and the previous input was repeated.
    pub stale: bool,
}

#[derive(Debug, Default)]
struct PlayerQueue {
    queue: VecDeque<BufferedInput>,
    last: Option<BufferedInput>,
    last_pushed_frame: Option<u32>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InputError {
    #[error("input for frame {frame} is not newer than frame {last}")]
    OutOfOrder { frame: u32, last: u32 },
}

#[derive(Debug, Default)]
pub struct InputBuffer {
    players: HashMap<u32, PlayerQueue>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, player_id: u32, local_command_frame: u32, input: Input) -> Result<(), InputError> {
        let queue = self.players.entry(player_id).or_default();
        if let Some(last) = queue.last_pushed_frame {
            if local_command_frame <= last {
                warn!(player_id, frame = local_command_frame, last, "Dropping out-of-order input");
                return Err(InputError::OutOfOrder {
                    frame: local_command_frame,
                    last,
                });
            }
        }
        queue.last_pushed_frame = Some(local_command_frame);
        queue.queue.push_back(BufferedInput {
            local_command_frame,
            input,
        });
        Ok(())
    }

    /// Next input for `player_id`. Past the end of the queue the last input is
    /// returned again with `stale` set; a player that never sent anything gets
    /// an empty input.
    pub fn pull(&mut self, player_id: u32) -> PulledInput {
        let queue = self.players.entry(player_id).or_default();
        match queue.queue.pop_front() {
            Some(next) => {
                queue.last = Some(next.clone());
                PulledInput {
                    local_command_frame: next.local_command_frame,
                    input: next.input,
                    stale: false,
                }
            }
            None => match &queue.last {
                Some(last) => PulledInput {
                    local_command_frame: last.local_command_frame,
                    input: last.input.clone(),
                    stale: true,
                },
                None => PulledInput {
                    local_command_frame: 0,
                    input: Input::default(),
                    stale: true,
                },
            },
        }
    }

    pub fn pending(&self, player_id: u32) -> usize {
        self.players.get(&player_id).map(|q| q.queue.len()).unwrap_or(0)
    }

    pub fn remove_player(&mut self, player_id: u32) {
        self.players.remove(&player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_returns_inputs_in_order_then_repeats_stale() {
        let mut buffer = InputBuffer::new();
        buffer.push(7, 1, Input::with_keys([Key::W])).unwrap();
        buffer.push(7, 2, Input::with_keys([Key::A])).unwrap();

        let first = buffer.pull(7);
        assert_eq!(first.local_command_frame, 1);
        assert!(first.input.pressed(Key::W));
        assert!(!first.stale);

        let second = buffer.pull(7);
        assert_eq!(second.local_command_frame, 2);

        let third = buffer.pull(7);
        assert!(third.stale);
        assert_eq!(third.local_command_frame, 2);
        assert!(third.input.pressed(Key::A));
    }

    #[test]
    fn unknown_player_gets_empty_stale_input() {
        let mut buffer = InputBuffer::new();
        let pulled = buffer.pull(99);
        assert!(pulled.stale);
        assert!(pulled.input.keys.is_empty());
    }

    #[test]
    fn non_increasing_frames_are_rejected() {
        let mut buffer = InputBuffer::new();
        buffer.push(1, 5, Input::default()).unwrap();
        assert_eq!(
            buffer.push(1, 5, Input::default()),
            Err(InputError::OutOfOrder { frame: 5, last: 5 })
        );
        assert_eq!(buffer.pending(1), 1);
    }

    #[test]
    fn movement_axes_follow_wasd() {
        let input = Input::with_keys([Key::W, Key::D]);
        assert_eq!(input.movement_axes(), Vec3::new(1.0, 0.0, -1.0));
    }
}
