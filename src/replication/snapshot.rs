//! Server-side snapshot capture and emission cadence

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};
use crate::world::{EntityId, World};

/// Replicated state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub accumulated_velocity: Vec3,
    #[serde(default)]
    pub grounded: bool,
    #[serde(default)]
    pub gravity_enabled: bool,
    #[serde(default)]
    pub animation_name: Option<String>,
}

/// Counters reported alongside every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub connected_players: usize,
    pub entity_count: usize,
    pub uptime_secs: u64,
}

/// Emits once per `interval_ms` of simulated time.
#[derive(Debug, Clone)]
pub struct ReplicationAccumulator {
    elapsed_ms: f64,
    interval_ms: f64,
}

impl ReplicationAccumulator {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            elapsed_ms: 0.0,
            interval_ms,
        }
    }

    /// Advance by one frame; true when a snapshot is due.
    pub fn should_send(&mut self, dt_ms: f64) -> bool {
        self.elapsed_ms += dt_ms;
        if self.elapsed_ms >= self.interval_ms {
            self.elapsed_ms -= self.interval_ms;
            true
        } else {
            false
        }
    }
}

/// Snapshot the state of one entity, if it exists.
pub fn entity_state(world: &mut World, id: EntityId) -> Option<EntityState> {
    let position = world.world_position(id)?;
    let rotation = world.world_rotation(id)?;
    let entity = world.get(id)?;
    let kin = entity.kinematic.clone().unwrap_or_default();
    Some(EntityState {
        id,
        position,
        rotation,
        velocity: kin.velocity,
        accumulated_velocity: kin.accumulated_velocity,
        grounded: kin.grounded,
        gravity_enabled: kin.gravity_enabled,
        animation_name: entity
            .animation
            .as_ref()
            .filter(|a| !a.clip.is_empty())
            .map(|a| a.clip.clone()),
    })
}

/// States of every replicated entity: everything that is neither static nor
/// a camera.
pub fn capture_entity_states(world: &mut World) -> Vec<EntityState> {
    let ids: Vec<EntityId> = world
        .iter()
        .filter(|e| !e.is_static && e.camera.is_none())
        .map(|e| e.id)
        .collect();
    ids.into_iter().filter_map(|id| entity_state(world, id)).collect()
}

/// Write a replicated state back onto a world entity. Kinematic entities are
/// roots, so the state's world pose is their local pose.
pub fn apply_entity_state(world: &mut World, state: &EntityState) -> bool {
    if !world.contains(state.id) {
        return false;
    }
    world.set_local_position(state.id, state.position);
    world.set_local_rotation(state.id, state.rotation);
    if let Some(entity) = world.get_mut(state.id) {
        if let Some(kin) = entity.kinematic.as_mut() {
            kin.velocity = state.velocity;
            kin.accumulated_velocity = state.accumulated_velocity;
            kin.grounded = state.grounded;
            kin.gravity_enabled = state.gravity_enabled;
        }
        if let (Some(anim), Some(name)) = (entity.animation.as_mut(), &state.animation_name) {
            anim.clip = name.clone();
        }
    }
    world.index_entity(state.id);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{CameraComponent, Entity, KinematicComponent, MeshComponent};

    #[test]
    fn cadence_is_one_update_per_interval() {
        let mut acc = ReplicationAccumulator::new(50.0);
        let frames = (1000.0_f64 / 16.0).ceil() as usize;
        let sent = (0..frames).filter(|_| acc.should_send(16.0)).count();
        assert!((19..=21).contains(&sent), "sent {sent}");
    }

    #[test]
    fn first_update_waits_for_a_full_interval() {
        let mut acc = ReplicationAccumulator::new(50.0);
        assert!(!acc.should_send(16.0));
        assert!(!acc.should_send(16.0));
        assert!(!acc.should_send(16.0));
        assert!(acc.should_send(16.0));
        assert!(!acc.should_send(16.0));
    }

    #[test]
    fn capture_skips_static_and_cameras() {
        let mut world = World::default();
        world
            .spawn(Entity::new("ground").with_mesh(MeshComponent::new("ground")).as_static())
            .unwrap();
        let mover = world
            .spawn(
                Entity::new("mover")
                    .with_position(Vec3::new(1.0, 2.0, 3.0))
                    .with_kinematic(KinematicComponent::with_gravity(100.0)),
            )
            .unwrap();
        world
            .spawn(Entity::new("camera").with_camera(CameraComponent::default()))
            .unwrap();

        let states = capture_entity_states(&mut world);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].id, mover);
        assert_eq!(states[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert!(states[0].gravity_enabled);
    }

    #[test]
    fn applying_a_state_moves_the_entity() {
        let mut world = World::default();
        let id = world
            .spawn(Entity::new("mover").with_kinematic(KinematicComponent::default()))
            .unwrap();
        let state = EntityState {
            id,
            position: Vec3::new(5.0, 0.0, -5.0),
            rotation: Quat::from_rotation_y(1.0),
            velocity: Vec3::X,
            accumulated_velocity: Vec3::ZERO,
            grounded: true,
            gravity_enabled: true,
            animation_name: None,
        };
        assert!(apply_entity_state(&mut world, &state));
        assert_eq!(world.world_position(id), Some(state.position));
        assert!(world.get(id).unwrap().kinematic.as_ref().unwrap().grounded);
        assert!(!apply_entity_state(&mut world, &EntityState { id: 999, ..state }));
    }
}
