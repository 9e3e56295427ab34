//! World model: entity store, transform hierarchy and spatial index
//!
//! The world owns every entity, the id counter and the spatial partition.
//! Entities refer to each other only by id; parent and child links are kept
//! consistent by the methods on [`World`].

pub mod entity;
pub mod mesh;
pub mod spatial;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collider::{Aabb, Collider};
use crate::math::{Mat4, Quat, Vec3};

pub use entity::{
    AiComponent, AnimationComponent, CameraComponent, CharacterControllerComponent,
    ColliderComponent, ColliderProxy, ColliderShape, ContactRecord, Entity, EntityId,
    KinematicComponent, MeshComponent, PlayerInputComponent, SpawnPointComponent,
};
pub use mesh::{MeshData, MeshError, MeshRegistry};
pub use spatial::SpatialPartition;

/// First id handed out by a fresh world.
pub const FIRST_ENTITY_ID: EntityId = 1;

/// Half-size of the box indexed for entities that have no geometry.
const POINT_EXTENT: f64 = 0.5;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WorldError {
    #[error("entity {0} not found")]
    NotFound(EntityId),

    #[error("entity id {0} already in use")]
    DuplicateId(EntityId),

    #[error("mesh handle '{handle}' on entity {entity} is not registered")]
    UnknownMesh { entity: EntityId, handle: String },

    #[error("parenting {child} under {parent} would create a cycle")]
    Cycle { child: EntityId, parent: EntityId },
}

pub struct World {
    entities: BTreeMap<EntityId, Entity>,
    next_id: EntityId,
    command_frame_count: u32,
    spatial: SpatialPartition,
    meshes: Arc<MeshRegistry>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.len())
            .field("next_id", &self.next_id)
            .field("command_frame_count", &self.command_frame_count)
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(Arc::new(MeshRegistry::with_builtins()), SpatialPartition::default())
    }
}

impl World {
    pub fn new(meshes: Arc<MeshRegistry>, spatial: SpatialPartition) -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: FIRST_ENTITY_ID,
            command_frame_count: 0,
            spatial,
            meshes,
        }
    }

    /// Build a world from already-identified entities, linking children to
    /// parents and indexing every entity.
    pub fn from_entities(
        meshes: Arc<MeshRegistry>,
        spatial: SpatialPartition,
        entities: Vec<Entity>,
        command_frame_count: u32,
    ) -> Result<Self, WorldError> {
        let mut world = Self::new(meshes, spatial);
        world.command_frame_count = command_frame_count;

        for mut entity in entities {
            if world.entities.contains_key(&entity.id) {
                return Err(WorldError::DuplicateId(entity.id));
            }
            entity.children.clear();
            world.prepare(&mut entity)?;
            world.next_id = world.next_id.max(entity.id.saturating_add(1));
            world.entities.insert(entity.id, entity);
        }

        let links: Vec<(EntityId, EntityId)> = world
            .entities
            .values()
            .filter_map(|e| e.parent.map(|p| (e.id, p)))
            .collect();
        for (child, parent) in &links {
            let parent_entity = world
                .entities
                .get_mut(parent)
                .ok_or(WorldError::NotFound(*parent))?;
            parent_entity.children.insert(*child);
        }
        for (child, parent) in links {
            if world.is_ancestor(child, parent) {
                return Err(WorldError::Cycle { child, parent });
            }
        }

        world.index_all();
        Ok(world)
    }

    pub fn meshes(&self) -> &Arc<MeshRegistry> {
        &self.meshes
    }

    pub fn spatial(&self) -> &SpatialPartition {
        &self.spatial
    }

    pub fn next_id(&self) -> EntityId {
        self.next_id
    }

    /// Raise the id counter. Never lowers it.
    pub fn reserve_ids_below(&mut self, next_id: EntityId) {
        self.next_id = self.next_id.max(next_id);
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn command_frame_count(&self) -> u32 {
        self.command_frame_count
    }

    pub fn increment_command_frame(&mut self) -> u32 {
        self.command_frame_count = self.command_frame_count.wrapping_add(1);
        self.command_frame_count
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Assign a fresh id to `entity` and insert it.
    pub fn spawn(&mut self, mut entity: Entity) -> Result<EntityId, WorldError> {
        entity.id = self.allocate_id();
        self.insert(entity)
    }

    /// Insert an entity that already carries an id, e.g. one replicated from
    /// the server.
    pub fn insert(&mut self, mut entity: Entity) -> Result<EntityId, WorldError> {
        let id = entity.id;
        if self.entities.contains_key(&id) {
            return Err(WorldError::DuplicateId(id));
        }
        if let Some(parent) = entity.parent {
            if !self.entities.contains_key(&parent) {
                return Err(WorldError::NotFound(parent));
            }
        }
        entity.children.clear();
        self.prepare(&mut entity)?;

        if let Some(parent) = entity.parent {
            if let Some(p) = self.entities.get_mut(&parent) {
                p.children.insert(id);
            }
        }
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.entities.insert(id, entity);
        self.index_entity(id);
        debug!(entity_id = id, "Entity inserted");
        Ok(id)
    }

    /// Resolve registry-backed collider geometry and reset runtime state.
    fn prepare(&self, entity: &mut Entity) -> Result<(), WorldError> {
        entity.dirty = true;
        entity.frame_contacts.clear();

        // Mesh-only entities collide as their mesh.
        if entity.collider.is_none() {
            if let Some(mesh) = &entity.mesh {
                entity.collider = Some(ColliderComponent::new(ColliderShape::Trimesh(
                    mesh.handle.clone(),
                )));
            }
        }

        let mesh_transform = entity.mesh.as_ref().map(|m| m.transform).unwrap_or(Mat4::IDENTITY);
        let id = entity.id;
        if let Some(collider) = entity.collider.as_mut() {
            collider.invalidate();
            collider.local = match &collider.shape {
                ColliderShape::Capsule(c) => Some(Collider::Capsule(*c)),
                ColliderShape::BoundingBox(b) => Some(Collider::Aabb(*b)),
                ColliderShape::Trimesh(handle) => {
                    let data = self.meshes.get(handle).ok_or_else(|| WorldError::UnknownMesh {
                        entity: id,
                        handle: handle.clone(),
                    })?;
                    Some(Collider::TriMesh(data.trimesh(&mesh_transform)))
                }
            };
        }
        Ok(())
    }

    /// Remove an entity. Children are detached first and become roots.
    pub fn delete_entity(&mut self, id: EntityId) -> Option<Entity> {
        let children: Vec<EntityId> = self.entities.get(&id)?.children.iter().copied().collect();
        for child in children {
            if let Some(c) = self.entities.get_mut(&child) {
                c.parent = None;
            }
            self.mark_dirty(child);
        }

        let mut entity = self.entities.remove(&id)?;
        if let Some(parent) = entity.parent {
            if let Some(p) = self.entities.get_mut(&parent) {
                p.children.remove(&id);
            }
        }
        entity.children.clear();
        self.spatial.delete(id);
        debug!(entity_id = id, "Entity deleted");
        Some(entity)
    }

    /// Whether `ancestor` appears on the parent chain of `id` (or is `id`).
    pub fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        let mut steps = 0usize;
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.entities.len() {
                return true;
            }
            current = self.entities.get(&cur).and_then(|e| e.parent);
        }
        false
    }

    /// Reparent `child`. `None` makes it a root.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<(), WorldError> {
        if !self.entities.contains_key(&child) {
            return Err(WorldError::NotFound(child));
        }
        if let Some(p) = parent {
            if !self.entities.contains_key(&p) {
                return Err(WorldError::NotFound(p));
            }
            if self.is_ancestor(child, p) {
                return Err(WorldError::Cycle { child, parent: p });
            }
        }

        let old = self.entities.get(&child).and_then(|e| e.parent);
        if let Some(old) = old {
            if let Some(o) = self.entities.get_mut(&old) {
                o.children.remove(&child);
            }
        }
        if let Some(p) = parent {
            if let Some(pe) = self.entities.get_mut(&p) {
                pe.children.insert(child);
            }
        }
        if let Some(c) = self.entities.get_mut(&child) {
            c.parent = parent;
        }
        self.mark_dirty(child);
        Ok(())
    }

    /// Flag `id` and all of its descendants for transform recomputation and
    /// invalidate their collider proxies.
    pub fn mark_dirty(&mut self, id: EntityId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(e) = self.entities.get_mut(&cur) {
                e.dirty = true;
                e.generation = e.generation.wrapping_add(1);
                stack.extend(e.children.iter().copied());
            }
        }
    }

    pub fn set_local_position(&mut self, id: EntityId, position: Vec3) -> bool {
        let Some(e) = self.entities.get_mut(&id) else {
            return false;
        };
        e.set_local_position(position);
        self.mark_dirty(id);
        true
    }

    pub fn set_local_rotation(&mut self, id: EntityId, rotation: Quat) -> bool {
        let Some(e) = self.entities.get_mut(&id) else {
            return false;
        };
        e.set_local_rotation(rotation);
        self.mark_dirty(id);
        true
    }

    pub fn set_local_scale(&mut self, id: EntityId, scale: Vec3) -> bool {
        let Some(e) = self.entities.get_mut(&id) else {
            return false;
        };
        e.set_local_scale(scale);
        self.mark_dirty(id);
        true
    }

    pub fn translate(&mut self, id: EntityId, delta: Vec3) -> bool {
        let Some(position) = self.entities.get(&id).map(Entity::local_position) else {
            return false;
        };
        self.set_local_position(id, position + delta)
    }

    /// World matrix of `id`, recomputing dirty links on the parent chain.
    pub fn world_transform(&mut self, id: EntityId) -> Option<Mat4> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let entity = self.entities.get(&cur)?;
            chain.push(cur);
            if chain.len() > self.entities.len() {
                warn!(entity_id = id, "Parent chain does not terminate");
                return None;
            }
            current = entity.parent;
        }

        let mut parent_world = Mat4::IDENTITY;
        let mut recomputed_above = false;
        for eid in chain.iter().rev() {
            let entity = self.entities.get_mut(eid)?;
            if recomputed_above || entity.dirty || !entity.cacheable() {
                entity.world_transform = parent_world * entity.local_matrix();
                entity.dirty = false;
                recomputed_above = true;
            }
            parent_world = entity.world_transform;
        }
        Some(parent_world)
    }

    pub fn world_position(&mut self, id: EntityId) -> Option<Vec3> {
        self.world_transform(id).map(|m| m.w_axis.truncate())
    }

    pub fn world_rotation(&mut self, id: EntityId) -> Option<Quat> {
        self.world_transform(id).map(|m| {
            let (_, rotation, _) = m.to_scale_rotation_translation();
            rotation
        })
    }

    /// Collider geometry in world space, rebuilt when the entity's generation
    /// has moved on since it was last computed.
    pub fn collider_proxy(&mut self, id: EntityId) -> Option<&ColliderProxy> {
        let world = self.world_transform(id)?;
        let entity = self.entities.get_mut(&id)?;
        entity.refresh_collider_proxy(&world);
        entity.collider.as_ref()?.proxy.as_ref()
    }

    /// Replace an entity's collider, resolving mesh handles.
    pub fn set_collider(&mut self, id: EntityId, collider: Option<ColliderComponent>) -> Result<(), WorldError> {
        let mut entity = self.entities.remove(&id).ok_or(WorldError::NotFound(id))?;
        let previous = std::mem::replace(&mut entity.collider, collider);
        let had_collider = entity.collider.is_some();
        let result = self.prepare(&mut entity);
        if result.is_err() {
            entity.collider = previous;
            let _ = self.prepare(&mut entity);
        }
        self.entities.insert(id, entity);
        if had_collider {
            self.mark_dirty(id);
        }
        self.index_entity(id);
        result
    }

    /// World-space box used for broad-phase indexing.
    pub fn bounding_box(&mut self, id: EntityId) -> Option<Aabb> {
        if let Some(proxy) = self.collider_proxy(id) {
            return Some(proxy.bounding_box);
        }
        let position = self.world_position(id)?;
        Some(Aabb::new(
            position - Vec3::splat(POINT_EXTENT),
            position + Vec3::splat(POINT_EXTENT),
        ))
    }

    /// Update the spatial partition with the entity's current box.
    pub fn index_entity(&mut self, id: EntityId) {
        if let Some(bbox) = self.bounding_box(id) {
            self.spatial.index(id, bbox);
        }
    }

    pub fn index_all(&mut self) {
        for id in self.ids() {
            self.index_entity(id);
        }
    }

    /// Entities whose indexed cells overlap `aabb`.
    pub fn query(&self, aabb: &Aabb) -> Vec<EntityId> {
        self.spatial.query(aabb)
    }

    pub fn first_spawn_point(&self) -> Option<EntityId> {
        self.entities.values().find(|e| e.spawn_point.is_some()).map(|e| e.id)
    }

    pub fn record_contact(&mut self, id: EntityId, record: ContactRecord) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.frame_contacts.push(record);
        }
    }

    pub fn clear_frame_contacts(&mut self) {
        for e in self.entities.values_mut() {
            e.frame_contacts.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Capsule;
    use crate::math::{compose, mat_approx_eq, approx_eq};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn world() -> World {
        World::default()
    }

    #[test]
    fn child_inherits_parent_transform() {
        let mut w = world();
        let parent = w.spawn(Entity::new("parent").with_position(Vec3::new(10.0, 0.0, 0.0))).unwrap();
        let child = w
            .spawn(Entity::new("child").with_parent(parent).with_position(Vec3::new(0.0, 5.0, 0.0)))
            .unwrap();

        assert!(approx_eq(w.world_position(child).unwrap(), Vec3::new(10.0, 5.0, 0.0), 1e-12));

        w.set_local_position(parent, Vec3::new(-3.0, 0.0, 0.0));
        assert!(w.get(child).unwrap().is_dirty());
        assert!(approx_eq(w.world_position(child).unwrap(), Vec3::new(-3.0, 5.0, 0.0), 1e-12));
        assert!(!w.get(child).unwrap().is_dirty());
    }

    #[test]
    fn cached_transform_matches_fresh_composition() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut w = world();
        let mut ids = Vec::new();
        for i in 0..30 {
            let mut e = Entity::new(format!("e{i}"));
            if !ids.is_empty() && rng.gen_bool(0.7) {
                e = e.with_parent(ids[rng.gen_range(0..ids.len())]);
            }
            ids.push(w.spawn(e).unwrap());
        }

        for _ in 0..200 {
            let id = ids[rng.gen_range(0..ids.len())];
            match rng.gen_range(0..3) {
                0 => {
                    w.set_local_position(id, Vec3::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0), 0.0));
                }
                1 => {
                    w.set_local_rotation(id, Quat::from_rotation_y(rng.gen_range(-3.0..3.0)));
                }
                _ => {
                    w.set_local_scale(id, Vec3::splat(rng.gen_range(0.5..2.0)));
                }
            }
            let probe = ids[rng.gen_range(0..ids.len())];
            let cached = w.world_transform(probe).unwrap();

            let mut expected = Mat4::IDENTITY;
            let mut chain = Vec::new();
            let mut cur = Some(probe);
            while let Some(c) = cur {
                chain.push(c);
                cur = w.get(c).unwrap().parent();
            }
            for c in chain.iter().rev() {
                let e = w.get(*c).unwrap();
                expected = expected * compose(e.local_position(), e.local_rotation(), e.local_scale());
            }
            assert!(mat_approx_eq(&cached, &expected, 1e-9));
        }
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut w = world();
        let a = w.spawn(Entity::new("a")).unwrap();
        let b = w.spawn(Entity::new("b").with_parent(a)).unwrap();
        let c = w.spawn(Entity::new("c").with_parent(b)).unwrap();
        assert_eq!(w.set_parent(a, Some(c)), Err(WorldError::Cycle { child: a, parent: c }));
        assert_eq!(w.set_parent(a, Some(a)), Err(WorldError::Cycle { child: a, parent: a }));
        w.set_parent(c, None).unwrap();
        assert!(w.get(c).unwrap().parent().is_none());
        assert_eq!(w.get(b).unwrap().children().count(), 0);
    }

    #[test]
    fn deleting_parent_detaches_children() {
        let mut w = world();
        let a = w.spawn(Entity::new("a").with_position(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        let b = w.spawn(Entity::new("b").with_parent(a)).unwrap();
        w.delete_entity(a).unwrap();
        assert!(!w.contains(a));
        assert!(w.get(b).unwrap().parent().is_none());
        assert!(approx_eq(w.world_position(b).unwrap(), Vec3::ZERO, 1e-12));
        assert!(!w.spatial().is_indexed(a));
    }

    #[test]
    fn ids_are_never_reused() {
        let mut w = world();
        let a = w.spawn(Entity::new("a")).unwrap();
        w.delete_entity(a);
        let b = w.spawn(Entity::new("b")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn collider_proxy_follows_generation() {
        let mut w = world();
        let id = w
            .spawn(
                Entity::new("body")
                    .with_collider(ColliderComponent::capsule(Capsule::upright(1.0, 2.0)))
                    .with_position(Vec3::new(0.0, 10.0, 0.0)),
            )
            .unwrap();
        let first = w.collider_proxy(id).unwrap().clone();
        assert!((first.bounding_box.min.y - 10.0).abs() < 1e-12);

        w.translate(id, Vec3::new(0.0, 5.0, 0.0));
        let second = w.collider_proxy(id).unwrap().clone();
        assert!(second.generation > first.generation);
        assert!((second.bounding_box.min.y - 15.0).abs() < 1e-12);
    }

    #[test]
    fn mesh_entities_default_to_trimesh_colliders() {
        let mut w = world();
        let id = w
            .spawn(Entity::new("floor").with_mesh(MeshComponent::new(mesh::GROUND_MESH)).as_static())
            .unwrap();
        let proxy = w.collider_proxy(id).unwrap();
        assert!(matches!(proxy.collider, Collider::TriMesh(ref m) if m.triangles.len() == 2));

        let err = w.spawn(Entity::new("ghost").with_mesh(MeshComponent::new("missing")));
        assert!(matches!(err, Err(WorldError::UnknownMesh { .. })));
    }

    #[test]
    fn from_entities_links_children_and_sets_next_id() {
        let parent = {
            let mut e = Entity::new("p");
            e.id = 40;
            e
        };
        let child = {
            let mut e = Entity::new("c").with_parent(40);
            e.id = 12;
            e
        };
        let w = World::from_entities(
            Arc::new(MeshRegistry::with_builtins()),
            SpatialPartition::default(),
            vec![child, parent],
            99,
        )
        .unwrap();
        assert_eq!(w.next_id(), 41);
        assert_eq!(w.command_frame_count(), 99);
        assert_eq!(w.get(40).unwrap().children().collect::<Vec<_>>(), vec![12]);
    }
}
