//! Entity record and its optional components

use serde::{Deserialize, Serialize};

use crate::collider::{Aabb, Capsule, Collider, TriMesh};
use crate::collision::{capsule_aabb, capsule_capsule, capsule_trimesh, Contact};
use crate::input::Input;
use crate::math::{compose, Mat4, Quat, Vec3};

/// Process-wide unique entity identifier, never reused within a session.
pub type EntityId = u32;

/// Default group bit every collider belongs to.
pub const DEFAULT_COLLIDER_GROUP: u32 = 1;
/// Default mask: collide with everything.
pub const DEFAULT_COLLISION_MASK: u32 = u32::MAX;

fn identity() -> Mat4 {
    Mat4::IDENTITY
}

fn one() -> Vec3 {
    Vec3::ONE
}

fn dirty_on_load() -> bool {
    true
}

fn default_group() -> u32 {
    DEFAULT_COLLIDER_GROUP
}

fn default_mask() -> u32 {
    DEFAULT_COLLISION_MASK
}

/// Handle into the external mesh registry plus a transform applied before
/// the entity's world transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshComponent {
    pub handle: String,
    #[serde(default = "identity")]
    pub transform: Mat4,
}

impl MeshComponent {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            transform: Mat4::IDENTITY,
        }
    }
}

/// Serialized collider description. Triangle meshes are stored by mesh handle
/// and rebuilt from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColliderShape {
    Capsule(Capsule),
    Trimesh(String),
    BoundingBox(Aabb),
}

/// Transformed collider geometry, valid for one transform generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ColliderProxy {
    pub generation: u64,
    pub collider: Collider,
    pub simplified: Option<TriMesh>,
    pub bounding_box: Aabb,
}

impl ColliderProxy {
    /// The geometry narrow-phase tests should use against this collider.
    pub fn narrow_phase_shape(&self) -> Collider {
        match &self.simplified {
            Some(mesh) => Collider::TriMesh(mesh.clone()),
            None => self.collider.clone(),
        }
    }

    /// Contacts that push `capsule` out of this collider, preferring the
    /// simplified mesh when one is attached.
    pub fn contacts_for(&self, capsule: &Capsule) -> Vec<Contact> {
        match (&self.simplified, &self.collider) {
            (Some(mesh), _) | (None, Collider::TriMesh(mesh)) => capsule_trimesh(capsule, mesh),
            (None, Collider::Capsule(other)) => capsule_capsule(capsule, other).into_iter().collect(),
            (None, Collider::Aabb(bbox)) => capsule_aabb(capsule, bbox),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColliderComponent {
    #[serde(flatten)]
    pub shape: ColliderShape,
    #[serde(default = "default_group")]
    pub collider_group: u32,
    #[serde(default = "default_mask")]
    pub collision_mask: u32,
    /// Entity-space geometry, rebuilt from `shape` when the entity enters a world.
    #[serde(skip)]
    pub(crate) local: Option<Collider>,
    #[serde(skip)]
    pub(crate) simplified: Option<TriMesh>,
    #[serde(skip)]
    pub(crate) proxy: Option<ColliderProxy>,
}

impl ColliderComponent {
    pub fn new(shape: ColliderShape) -> Self {
        let local = match &shape {
            ColliderShape::Capsule(c) => Some(Collider::Capsule(*c)),
            ColliderShape::BoundingBox(b) => Some(Collider::Aabb(*b)),
            ColliderShape::Trimesh(_) => None,
        };
        Self {
            shape,
            collider_group: DEFAULT_COLLIDER_GROUP,
            collision_mask: DEFAULT_COLLISION_MASK,
            local,
            simplified: None,
            proxy: None,
        }
    }

    pub fn capsule(capsule: Capsule) -> Self {
        Self::new(ColliderShape::Capsule(capsule))
    }

    pub fn with_mask(mut self, group: u32, mask: u32) -> Self {
        self.collider_group = group;
        self.collision_mask = mask;
        self
    }

    /// Attach a coarser mesh used in place of the full one during resolution.
    pub fn with_simplified(mut self, mesh: TriMesh) -> Self {
        self.simplified = Some(mesh);
        self.proxy = None;
        self
    }

    pub fn is_capsule(&self) -> bool {
        matches!(self.shape, ColliderShape::Capsule(_))
    }

    pub fn is_trimesh(&self) -> bool {
        matches!(self.shape, ColliderShape::Trimesh(_))
    }

    pub fn local(&self) -> Option<&Collider> {
        self.local.as_ref()
    }

    /// Whether this collider wants to be tested against `other`.
    pub fn accepts(&self, other: &ColliderComponent) -> bool {
        self.collision_mask & other.collider_group != 0
    }

    pub(crate) fn invalidate(&mut self) {
        self.proxy = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicComponent {
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub accumulated_velocity: Vec3,
    #[serde(default)]
    pub grounded: bool,
    #[serde(default)]
    pub gravity_enabled: bool,
    #[serde(default)]
    pub move_intent: Vec3,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub jump: bool,
}

impl KinematicComponent {
    pub fn with_gravity(speed: f64) -> Self {
        Self {
            gravity_enabled: true,
            speed,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterControllerComponent {
    #[serde(default)]
    pub control_vector: Vec3,
    pub speed: f64,
    pub fly_speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraComponent {
    #[serde(default)]
    pub target_offset: Vec3,
    #[serde(default)]
    pub target: Option<EntityId>,
}

/// Opaque reference to an external animation player. Only the handle is
/// persisted; clip selection and playback time are rebuilt at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimationComponent {
    pub handle: String,
    /// Root motion: the player's output moves the entity, so its transform
    /// cannot be cached.
    #[serde(default)]
    pub drives_transform: bool,
    #[serde(skip)]
    pub clip: String,
    #[serde(skip)]
    pub elapsed_ms: f64,
}

/// Tags the camera entity that represents a remote player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInputComponent {
    pub player_id: u32,
    #[serde(skip)]
    pub input: Input,
    #[serde(skip)]
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnPointComponent {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiComponent {
    /// Maximum distance from `home` the agent wanders.
    pub wander_radius: f64,
    #[serde(default)]
    pub home: Option<Vec3>,
    #[serde(skip)]
    pub frames_until_decision: u32,
}

impl Default for AiComponent {
    fn default() -> Self {
        Self {
            wander_radius: 500.0,
            home: None,
            frames_until_decision: 0,
        }
    }
}

/// A contact applied to this entity during the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    pub other: EntityId,
    pub separating_vector: Vec3,
}

/// Entity record. Local transform fields are private: they are only changed
/// through [`crate::world::World`] so dirty flags propagate to descendants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    local_position: Vec3,
    #[serde(default)]
    local_rotation: Quat,
    #[serde(default = "one")]
    local_scale: Vec3,

    #[serde(default)]
    pub(crate) parent: Option<EntityId>,
    #[serde(default)]
    pub(crate) children: std::collections::BTreeSet<EntityId>,

    #[serde(default)]
    pub mesh: Option<MeshComponent>,
    #[serde(default)]
    pub(crate) collider: Option<ColliderComponent>,
    #[serde(default)]
    pub kinematic: Option<KinematicComponent>,
    #[serde(default)]
    pub character_controller: Option<CharacterControllerComponent>,
    #[serde(default)]
    pub camera: Option<CameraComponent>,
    #[serde(default)]
    pub animation: Option<AnimationComponent>,
    #[serde(default)]
    pub player_input: Option<PlayerInputComponent>,
    #[serde(default)]
    pub spawn_point: Option<SpawnPointComponent>,
    #[serde(default)]
    pub ai: Option<AiComponent>,
    #[serde(default)]
    pub deadge: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,

    #[serde(skip, default = "dirty_on_load")]
    pub(crate) dirty: bool,
    #[serde(skip)]
    pub(crate) generation: u64,
    #[serde(skip, default = "identity")]
    pub(crate) world_transform: Mat4,
    #[serde(skip)]
    pub(crate) frame_contacts: Vec<ContactRecord>,
}

impl Entity {
    /// A detached entity. The id is assigned when it is spawned into a world.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
            parent: None,
            children: Default::default(),
            mesh: None,
            collider: None,
            kinematic: None,
            character_controller: None,
            camera: None,
            animation: None,
            player_input: None,
            spawn_point: None,
            ai: None,
            deadge: false,
            is_static: false,
            dirty: true,
            generation: 0,
            world_transform: Mat4::IDENTITY,
            frame_contacts: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.local_position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.local_rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.local_scale = scale;
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_mesh(mut self, mesh: MeshComponent) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_collider(mut self, collider: ColliderComponent) -> Self {
        self.collider = Some(collider);
        self
    }

    pub fn with_kinematic(mut self, kinematic: KinematicComponent) -> Self {
        self.kinematic = Some(kinematic);
        self
    }

    pub fn with_character_controller(mut self, cc: CharacterControllerComponent) -> Self {
        self.character_controller = Some(cc);
        self
    }

    pub fn with_camera(mut self, camera: CameraComponent) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_animation(mut self, animation: AnimationComponent) -> Self {
        self.animation = Some(animation);
        self
    }

    pub fn with_player_input(mut self, player_id: u32) -> Self {
        self.player_input = Some(PlayerInputComponent {
            player_id,
            ..Default::default()
        });
        self
    }

    pub fn with_spawn_point(mut self) -> Self {
        self.spawn_point = Some(SpawnPointComponent {});
        self
    }

    pub fn with_ai(mut self, ai: AiComponent) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    pub fn local_rotation(&self) -> Quat {
        self.local_rotation
    }

    pub fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    pub fn local_matrix(&self) -> Mat4 {
        compose(self.local_position, self.local_rotation, self.local_scale)
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.children.iter().copied()
    }

    pub fn collider(&self) -> Option<&ColliderComponent> {
        self.collider.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn frame_contacts(&self) -> &[ContactRecord] {
        &self.frame_contacts
    }

    pub fn has_capsule(&self) -> bool {
        self.collider.as_ref().is_some_and(ColliderComponent::is_capsule)
    }

    /// Whether the cached world transform may be reused.
    pub(crate) fn cacheable(&self) -> bool {
        !self.animation.as_ref().is_some_and(|a| a.drives_transform)
    }

    pub(crate) fn set_local_position(&mut self, position: Vec3) {
        self.local_position = position;
    }

    pub(crate) fn set_local_rotation(&mut self, rotation: Quat) {
        self.local_rotation = rotation;
    }

    pub(crate) fn set_local_scale(&mut self, scale: Vec3) {
        self.local_scale = scale;
    }

    /// Rebuild the collider proxy if it was computed for an older generation.
    pub(crate) fn refresh_collider_proxy(&mut self, world: &Mat4) {
        let generation = self.generation;
        let Some(collider) = self.collider.as_mut() else {
            return;
        };
        if collider.proxy.as_ref().is_some_and(|p| p.generation == generation) {
            return;
        }
        let Some(local) = collider.local.as_ref() else {
            return;
        };
        let transformed = local.transform(world);
        let simplified = collider.simplified.as_ref().map(|m| m.transform(world));
        let Some(bounding_box) = transformed.bounding_box() else {
            collider.proxy = None;
            return;
        };
        collider.proxy = Some(ColliderProxy {
            generation,
            collider: transformed,
            simplified,
            bounding_box,
        });
    }
}
