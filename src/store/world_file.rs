//! JSON persistence of the entity tree
//!
//! The document is `{ entities, command_frame_count, next_id }`. Derived
//! runtime state (world transforms, collider proxies, contact records,
//! animation playback) is not stored and is rebuilt on load.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::world::{Entity, EntityId, MeshRegistry, SpatialPartition, World, WorldError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("World file IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed world document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid world contents: {0}")]
    World(#[from] WorldError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedWorld {
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub command_frame_count: u32,
    #[serde(default)]
    pub next_id: EntityId,
}

impl SerializedWorld {
    pub fn capture(world: &World) -> Self {
        Self {
            entities: world.iter().cloned().collect(),
            command_frame_count: world.command_frame_count(),
            next_id: world.next_id(),
        }
    }

    /// Rebuild a live world. The id counter resumes at the larger of the
    /// stored `next_id` and one past the highest id present.
    pub fn into_world(self, meshes: Arc<MeshRegistry>, spatial: SpatialPartition) -> Result<World, StoreError> {
        let mut world = World::from_entities(meshes, spatial, self.entities, self.command_frame_count)?;
        world.reserve_ids_below(self.next_id);
        Ok(world)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serialize a world into bytes suitable for `AckPlayerJoin`.
pub fn world_bytes(world: &World) -> Result<Vec<u8>, StoreError> {
    SerializedWorld::capture(world).to_bytes()
}

/// Rebuild a world received as bytes, reusing the registry and partition
/// shape of `like`.
pub fn world_from_bytes(bytes: &[u8], like: &World) -> Result<World, StoreError> {
    SerializedWorld::from_bytes(bytes)?.into_world(like.meshes().clone(), fresh_partition(like))
}

pub fn entity_bytes(entity: &Entity) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(entity)?)
}

pub fn entity_from_bytes(bytes: &[u8]) -> Result<Entity, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write the world as pretty JSON, replacing the file atomically.
pub fn save_world(world: &World, path: &Path) -> Result<(), StoreError> {
    let document = serde_json::to_vec_pretty(&SerializedWorld::capture(world))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, document)?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), entities = world.len(), "Saved world");
    Ok(())
}

pub fn load_world(path: &Path, meshes: Arc<MeshRegistry>, spatial: SpatialPartition) -> Result<World, StoreError> {
    let bytes = fs::read(path)?;
    let world = SerializedWorld::from_bytes(&bytes)?.into_world(meshes, spatial)?;
    info!(
        path = %path.display(),
        entities = world.len(),
        next_id = world.next_id(),
        "Loaded world"
    );
    Ok(world)
}

/// Replace `world` with the file's contents. On any error the current world
/// is kept untouched.
pub fn reload_world(world: &mut World, path: &Path) -> Result<(), StoreError> {
    match load_world(path, world.meshes().clone(), fresh_partition(world)) {
        Ok(loaded) => {
            *world = loaded;
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "World reload failed, keeping current world");
            Err(e)
        }
    }
}

fn fresh_partition(like: &World) -> SpatialPartition {
    SpatialPartition::new(like.spatial().count(), like.spatial().dimension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Capsule;
    use crate::math::{Quat, Vec3};
    use crate::world::{AnimationComponent, ColliderComponent, KinematicComponent, MeshComponent};

    fn sample_world() -> (World, EntityId, EntityId) {
        let mut world = World::default();
        world
            .spawn(Entity::new("ground").with_mesh(MeshComponent::new("ground")).as_static())
            .unwrap();
        let parent = world
            .spawn(
                Entity::new("avatar")
                    .with_position(Vec3::new(10.0, 0.0, -4.0))
                    .with_rotation(Quat::from_rotation_y(0.5))
                    .with_collider(ColliderComponent::capsule(Capsule::upright(40.0, 80.0)))
                    .with_kinematic(KinematicComponent::with_gravity(300.0))
                    .with_animation(AnimationComponent {
                        handle: "alpha3".into(),
                        clip: "run".into(),
                        elapsed_ms: 120.0,
                        ..Default::default()
                    }),
            )
            .unwrap();
        let child = world
            .spawn(
                Entity::new("hat")
                    .with_parent(parent)
                    .with_position(Vec3::new(0.0, 160.0, 0.0)),
            )
            .unwrap();
        (world, parent, child)
    }

    #[test]
    fn round_trip_preserves_tree_and_transforms() {
        let (mut world, parent, child) = sample_world();
        let bytes = world_bytes(&world).unwrap();
        let mut loaded = world_from_bytes(&bytes, &world).unwrap();

        assert_eq!(loaded.len(), world.len());
        assert_eq!(loaded.next_id(), world.next_id());
        assert_eq!(loaded.get(child).unwrap().parent(), Some(parent));
        assert!(loaded.get(parent).unwrap().children().any(|c| c == child));
        assert_eq!(loaded.world_position(child), world.world_position(child));
        assert!(loaded.get(parent).unwrap().collider().unwrap().is_capsule());

        let animation = loaded.get(parent).unwrap().animation.clone().unwrap();
        assert_eq!(animation.handle, "alpha3");
        assert!(animation.clip.is_empty());
    }

    #[test]
    fn colliders_serialize_by_shape_name() {
        let (world, _, _) = sample_world();
        let json: serde_json::Value = serde_json::from_slice(&world_bytes(&world).unwrap()).unwrap();
        let entities = json["entities"].as_array().unwrap();
        assert!(entities.iter().any(|e| e["collider"]["capsule"].is_object()));
        assert!(entities.iter().any(|e| e["collider"]["trimesh"] == "ground"));
        assert!(entities.iter().any(|e| e["static"] == true));
    }

    #[test]
    fn next_id_never_goes_backwards() {
        let (world, _, _) = sample_world();
        let mut doc = SerializedWorld::capture(&world);
        doc.next_id = 1;
        let loaded = doc
            .into_world(world.meshes().clone(), SpatialPartition::default())
            .unwrap();
        assert_eq!(loaded.next_id(), 4);
    }

    #[test]
    fn unknown_mesh_handle_fails_to_load() {
        let doc = r#"{"entities":[{"id":1,"mesh":{"handle":"nope"}}],"command_frame_count":0,"next_id":2}"#;
        let err = SerializedWorld::from_bytes(doc.as_bytes())
            .unwrap()
            .into_world(Arc::new(MeshRegistry::with_builtins()), SpatialPartition::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::World(WorldError::UnknownMesh { .. })));
    }

    #[test]
    fn failed_reload_keeps_the_current_world() {
        let (mut world, parent, _) = sample_world();
        let dir = std::env::temp_dir().join(format!("simcore-reload-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(reload_world(&mut world, &path).is_err());
        assert!(world.contains(parent));
        assert_eq!(world.len(), 3);

        save_world(&world, &path).unwrap();
        world.delete_entity(parent);
        reload_world(&mut world, &path).unwrap();
        assert!(world.contains(parent));
        fs::remove_dir_all(&dir).unwrap();
    }
}
