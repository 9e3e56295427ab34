//! Server-side pairwise collision resolution
//!
//! Colliders are packed into [`CollisionData`] records once per pass. Every
//! overlapping pair that involves a capsule is resolved by splitting the
//! separating vector between the two sides, smallest contact first, until no
//! pair produces a contact or the iteration bound is reached.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::collider::{Aabb, Collider};
use crate::collision::{collide, Contact};
use crate::math::{normalize_or, Vec3, UP};
use crate::world::{ContactRecord, EntityId, World};

use super::{PhysicsSettings, GROUNDED_DOT};

/// Packed per-entity collision state for one resolution pass.
#[derive(Debug, Clone)]
pub struct CollisionData {
    pub entity_id: EntityId,
    pub collider_group: u32,
    pub collision_mask: u32,
    pub is_static: bool,
    pub has_capsule: bool,
    pub has_trimesh: bool,
    /// True when a character controller is actively steering this entity.
    pub is_driven: bool,
    pub cached_bbox: Aabb,
    pub cached_collider: Collider,
    /// Set when the entity moved and its cache must be rebuilt.
    pub should_resolve: bool,
}

impl CollisionData {
    fn pack(world: &mut World, id: EntityId) -> Option<Self> {
        let proxy = world.collider_proxy(id)?;
        let cached_bbox = proxy.bounding_box;
        let cached_collider = proxy.narrow_phase_shape();
        let entity = world.get(id)?;
        let collider = entity.collider()?;
        Some(Self {
            entity_id: id,
            collider_group: collider.collider_group,
            collision_mask: collider.collision_mask,
            is_static: entity.is_static,
            has_capsule: collider.is_capsule(),
            has_trimesh: matches!(cached_collider, Collider::TriMesh(_)),
            is_driven: entity
                .character_controller
                .as_ref()
                .is_some_and(|cc| cc.control_vector != Vec3::ZERO),
            cached_bbox,
            cached_collider,
            should_resolve: false,
        })
    }

    fn refresh(&mut self, world: &mut World) {
        if !self.should_resolve {
            return;
        }
        if let Some(proxy) = world.collider_proxy(self.entity_id) {
            self.cached_bbox = proxy.bounding_box;
            self.cached_collider = proxy.narrow_phase_shape();
        }
        self.should_resolve = false;
    }
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    pub iterations: usize,
    pub pair_count: usize,
    pub hit_cap: bool,
    /// Entities pushed upward by at least one applied share.
    pub grounded: BTreeSet<EntityId>,
    pub moved: BTreeSet<EntityId>,
}

/// Fraction of the separating vector applied to `(a, b)`. `a` moves along the
/// vector, `b` against it.
fn split(a: &CollisionData, b: &CollisionData) -> (f64, f64) {
    match (a.is_static, b.is_static) {
        (true, true) => (0.0, 0.0),
        (false, true) => (1.0, 0.0),
        (true, false) => (0.0, 1.0),
        (false, false) => match (a.is_driven, b.is_driven) {
            (true, false) => (1.0, 0.0),
            (false, true) => (0.0, 1.0),
            _ => (0.5, 0.5),
        },
    }
}

fn wants(a: &CollisionData, b: &CollisionData) -> bool {
    a.collision_mask & b.collider_group != 0
}

/// Resolve every overlapping pair among entities that carry colliders.
pub fn resolve_collisions(world: &mut World, settings: &PhysicsSettings) -> ResolveReport {
    let mut report = ResolveReport::default();

    let mut data: Vec<CollisionData> = Vec::new();
    let mut index: HashMap<EntityId, usize> = HashMap::new();
    for id in world.ids() {
        if let Some(d) = CollisionData::pack(world, id) {
            index.insert(id, data.len());
            data.push(d);
        }
    }

    // Pairs always contain a non-static capsule, so every split moves something.
    let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (i, d) in data.iter().enumerate() {
        if d.is_static || !d.has_capsule {
            continue;
        }
        for other in world.query(&d.cached_bbox) {
            let Some(&j) = index.get(&other) else {
                continue;
            };
            if i == j || !wants(d, &data[j]) {
                continue;
            }
            pairs.insert((i.min(j), i.max(j)));
        }
    }
    report.pair_count = pairs.len();
    if pairs.is_empty() {
        return report;
    }

    let bound = 2 * settings.resolve_count_max as usize * pairs.len();
    loop {
        if report.iterations >= bound {
            report.hit_cap = true;
            warn!(iterations = report.iterations, pairs = report.pair_count, "Pairwise resolution hit iteration bound");
            break;
        }
        for d in data.iter_mut() {
            d.refresh(world);
        }

        let mut smallest: Option<(usize, usize, Contact)> = None;
        for &(i, j) in &pairs {
            let (a, b) = (&data[i], &data[j]);
            if !a.cached_bbox.intersects(&b.cached_bbox) {
                continue;
            }
            for contact in collide(&a.cached_collider, &b.cached_collider) {
                if smallest.map_or(true, |(_, _, s)| contact.separating_distance < s.separating_distance) {
                    smallest = Some((i, j, contact));
                }
            }
        }
        let Some((i, j, contact)) = smallest else {
            break;
        };
        report.iterations += 1;

        let (share_a, share_b) = split(&data[i], &data[j]);
        let sep = contact.separating_vector;
        let (id_a, id_b) = (data[i].entity_id, data[j].entity_id);

        if share_a > 0.0 {
            world.translate(id_a, sep * share_a);
            world.record_contact(id_a, ContactRecord { other: id_b, separating_vector: sep * share_a });
            data[i].should_resolve = true;
            report.moved.insert(id_a);
            if normalize_or(sep, Vec3::ZERO).dot(UP) >= GROUNDED_DOT {
                report.grounded.insert(id_a);
            }
        }
        if share_b > 0.0 {
            world.translate(id_b, -sep * share_b);
            world.record_contact(id_b, ContactRecord { other: id_a, separating_vector: -sep * share_b });
            data[j].should_resolve = true;
            report.moved.insert(id_b);
            if normalize_or(-sep, Vec3::ZERO).dot(UP) >= GROUNDED_DOT {
                report.grounded.insert(id_b);
            }
        }
    }

    for id in &report.moved {
        world.index_entity(*id);
    }
    debug!(iterations = report.iterations, pairs = report.pair_count, moved = report.moved.len(), "Resolved collisions");
    report
}
