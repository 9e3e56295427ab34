//! Kinematic stepping and collision resolution
//!
//! Two resolution strategies live here. [`kinematic`] moves a single capsule
//! out of everything it touches, deepest contact first; clients use it for
//! their own avatar and for prediction replay. [`resolve`] is the server's
//! pairwise pass over every overlapping pair in the world.

pub mod kinematic;
pub mod resolve;

use serde::{Deserialize, Serialize};

pub use kinematic::{integrate, kinematic_step, resolve_single, StepReport};
pub use resolve::{resolve_collisions, CollisionData, ResolveReport};

/// Upper bound on single-entity resolution iterations per step.
pub const MAX_RESOLVE_ITERATIONS: u32 = 100;

/// A contact whose direction has at least this much +Y counts as ground.
pub const GROUNDED_DOT: f64 = 0.85;

/// Movement tuning shared by server and client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    /// Downward acceleration, units per second squared.
    pub gravity: f64,
    /// Upward velocity added by a jump.
    pub jump_impulse: f64,
    /// Steepest walkable slope, radians.
    pub slope_limit: f64,
    /// Yaw slew rate toward the direction of travel, radians per second.
    pub yaw_rate: f64,
    /// How far below the capsule base the slope probe looks.
    pub ground_probe_distance: f64,
    /// Multiplier on the pair count bounding the server resolve loop.
    pub resolve_count_max: u32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            gravity: 2000.0,
            jump_impulse: 800.0,
            slope_limit: std::f64::consts::FRAC_PI_4,
            yaw_rate: std::f64::consts::TAU,
            ground_probe_distance: 20.0,
            resolve_count_max: 4,
        }
    }
}
