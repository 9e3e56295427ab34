//! Per-entity behaviours shared by the server and client frame loops

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::input::{Input, Key};
use crate::math::{horizontal, normalize_or, yaw_of, Quat, Vec3, EPSILON, UP};
use crate::world::{EntityId, World};

/// Speed multiplier while LeftShift is held.
pub const SPRINT_MULTIPLIER: f64 = 2.0;

/// Command frames between AI decisions, as a half-open range.
const AI_DECISION_FRAMES: std::ops::Range<u32> = 30..120;

/// Translate one frame of input into movement intent for a character
/// controller. Movement is relative to the input's camera yaw. Walking
/// entities jump on Space when grounded; entities without gravity fly, with
/// Space and LeftControl moving up and down.
pub fn drive(world: &mut World, id: EntityId, input: &Input) -> bool {
    let Some(entity) = world.get_mut(id) else {
        return false;
    };
    let Some(cc) = entity.character_controller.as_mut() else {
        return false;
    };

    let facing = Quat::from_rotation_y(yaw_of(input.camera_rotation));
    let control = normalize_or(horizontal(facing * input.movement_axes()), Vec3::ZERO);
    cc.control_vector = control;
    let (speed, fly_speed) = (cc.speed, cc.fly_speed);

    let Some(kin) = entity.kinematic.as_mut() else {
        return true;
    };
    if kin.gravity_enabled {
        kin.move_intent = control;
        kin.speed = if input.pressed(Key::LeftShift) {
            speed * SPRINT_MULTIPLIER
        } else {
            speed
        };
        if input.pressed(Key::Space) && kin.grounded {
            kin.jump = true;
        }
    } else {
        let mut intent = control;
        if input.pressed(Key::Space) {
            intent += UP;
        }
        if input.pressed(Key::LeftControl) {
            intent -= UP;
        }
        kin.move_intent = normalize_or(intent, Vec3::ZERO);
        kin.speed = fly_speed;
    }
    true
}

/// Move every camera that has a target to the target's position plus its
/// offset. Cameras tagged with player input take the player's view rotation.
pub fn follow_targets(world: &mut World) {
    let cameras: Vec<(EntityId, EntityId, Vec3, Option<Quat>)> = world
        .iter()
        .filter_map(|e| {
            let camera = e.camera.as_ref()?;
            let target = camera.target?;
            let view = e.player_input.as_ref().map(|p| p.input.camera_rotation);
            Some((e.id, target, camera.target_offset, view))
        })
        .collect();

    for (camera, target, offset, view) in cameras {
        let Some(position) = world.world_position(target) else {
            continue;
        };
        world.set_local_position(camera, position + offset);
        if let Some(rotation) = view {
            world.set_local_rotation(camera, rotation);
        }
        world.index_entity(camera);
    }
}

/// Clip name implied by an entity's motion.
pub fn motion_clip(grounded: bool, velocity: Vec3) -> &'static str {
    if !grounded {
        "fall"
    } else if horizontal(velocity).length_squared() > EPSILON {
        "run"
    } else {
        "idle"
    }
}

/// Advance animation time and pick clips from kinematic state. Switching
/// clips restarts playback.
pub fn tick_animations(world: &mut World, dt_ms: f64) {
    for entity in world.iter_mut() {
        let clip = entity
            .kinematic
            .as_ref()
            .map(|k| motion_clip(k.grounded, k.velocity));
        let Some(animation) = entity.animation.as_mut() else {
            continue;
        };
        match clip {
            Some(clip) if animation.clip != clip => {
                animation.clip = clip.to_string();
                animation.elapsed_ms = 0.0;
            }
            _ => animation.elapsed_ms += dt_ms,
        }
    }
}

/// Steer an AI entity: every few frames pick a random point within its
/// wander radius of home and walk toward it.
pub fn wander(world: &mut World, id: EntityId, rng: &mut ChaCha8Rng) {
    let Some(position) = world.world_position(id) else {
        return;
    };
    let Some(entity) = world.get_mut(id) else {
        return;
    };
    let Some(ai) = entity.ai.as_mut() else {
        return;
    };
    let home = *ai.home.get_or_insert(position);

    if ai.frames_until_decision > 0 {
        ai.frames_until_decision -= 1;
        return;
    }
    ai.frames_until_decision = rng.gen_range(AI_DECISION_FRAMES);

    let intent = if horizontal(position - home).length() > ai.wander_radius {
        normalize_or(horizontal(home - position), Vec3::ZERO)
    } else if rng.gen_bool(0.25) {
        Vec3::ZERO
    } else {
        let angle = rng.gen_range(0.0..std::f64::consts::TAU);
        let distance = rng.gen_range(0.0..=ai.wander_radius);
        let goal = home + Vec3::new(angle.cos(), 0.0, angle.sin()) * distance;
        normalize_or(horizontal(goal - position), Vec3::ZERO)
    };

    if let Some(kin) = entity.kinematic.as_mut() {
        kin.move_intent = intent;
    }
}
