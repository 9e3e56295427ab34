//! Input producers for headless clients

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::math::Quat;

use super::{Input, Key};

/// Produces one input per local command frame.
pub trait InputSource: Send {
    fn sample(&mut self, command_frame: u32) -> Input;
}

/// Never presses anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn sample(&mut self, _command_frame: u32) -> Input {
        Input::default()
    }
}

/// Replays a fixed list of inputs, holding the last one once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    inputs: Vec<Input>,
    cursor: usize,
}

impl ScriptedInput {
    pub fn new(inputs: Vec<Input>) -> Self {
        Self { inputs, cursor: 0 }
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, _command_frame: u32) -> Input {
        let input = self
            .inputs
            .get(self.cursor)
            .or_else(|| self.inputs.last())
            .cloned()
            .unwrap_or_default();
        self.cursor += 1;
        input
    }
}

/// Walks in random directions, changing course every so often. Seeded so a
/// run can be reproduced.
#[derive(Debug, Clone)]
pub struct WanderInput {
    rng: ChaCha8Rng,
    current: Input,
    frames_left: u32,
}

impl WanderInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            current: Input::default(),
            frames_left: 0,
        }
    }
}

impl InputSource for WanderInput {
    fn sample(&mut self, _command_frame: u32) -> Input {
        if self.frames_left == 0 {
            self.frames_left = self.rng.gen_range(20..90);
            let mut keys = Vec::new();
            if self.rng.gen_bool(0.8) {
                keys.push(Key::W);
            }
            if self.rng.gen_bool(0.1) {
                keys.push(Key::Space);
            }
            if self.rng.gen_bool(0.2) {
                keys.push(Key::LeftShift);
            }
            self.current = Input {
                camera_rotation: Quat::from_rotation_y(self.rng.gen_range(0.0..std::f64::consts::TAU)),
                ..Input::with_keys(keys)
            };
        }
        self.frames_left -= 1;
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_input_holds_the_last_entry() {
        let mut source = ScriptedInput::new(vec![Input::with_keys([Key::W]), Input::with_keys([Key::S])]);
        assert!(source.sample(1).pressed(Key::W));
        assert!(source.sample(2).pressed(Key::S));
        assert!(source.sample(3).pressed(Key::S));
        assert_eq!(ScriptedInput::default().sample(1), Input::default());
    }

    #[test]
    fn wander_is_reproducible() {
        let mut a = WanderInput::new(5);
        let mut b = WanderInput::new(5);
        for frame in 0..300 {
            assert_eq!(a.sample(frame), b.sample(frame));
        }
    }

    #[test]
    fn wander_holds_a_course_for_a_while() {
        let mut source = WanderInput::new(1);
        let first = source.sample(0);
        for frame in 1..20 {
            assert_eq!(source.sample(frame), first);
        }
    }
}
