//! Fixed-step command-frame scheduling

use tracing::warn;

/// Nominal length of one command frame.
pub const MS_PER_COMMAND_FRAME: f64 = 16.0;

/// Nominal interval between replicated snapshots.
pub const MS_PER_GAME_STATE_UPDATE: f64 = 50.0;

/// Frames run per outer tick before the backlog is discarded.
pub const MAX_COMMAND_FRAMES_PER_LOOP: u32 = 8;

/// Accumulates wall-clock time and runs whole command frames from it.
#[derive(Debug, Clone)]
pub struct CommandFrameLoop {
    accumulator_ms: f64,
    step_ms: f64,
    max_frames_per_loop: u32,
}

impl Default for CommandFrameLoop {
    fn default() -> Self {
        Self::new(MS_PER_COMMAND_FRAME, MAX_COMMAND_FRAMES_PER_LOOP)
    }
}

impl CommandFrameLoop {
    pub fn new(step_ms: f64, max_frames_per_loop: u32) -> Self {
        Self {
            accumulator_ms: 0.0,
            step_ms,
            max_frames_per_loop: max_frames_per_loop.max(1),
        }
    }

    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    pub fn accumulator_ms(&self) -> f64 {
        self.accumulator_ms
    }

    /// Add `delta_ms` and call `frame` once per whole step available. If the
    /// spike guard trips, the remaining backlog is dropped. Returns the
    /// number of frames run.
    pub fn advance<F: FnMut()>(&mut self, delta_ms: f64, mut frame: F) -> u32 {
        self.accumulator_ms += delta_ms.max(0.0);
        let mut frames = 0;
        while self.accumulator_ms >= self.step_ms {
            frame();
            frames += 1;
            self.accumulator_ms -= self.step_ms;
            if frames >= self.max_frames_per_loop && self.accumulator_ms >= self.step_ms {
                warn!(
                    frames,
                    dropped_ms = self.accumulator_ms,
                    "Command frame backlog dropped"
                );
                self.accumulator_ms = 0.0;
                break;
            }
        }
        frames
    }
}
