//! Fixed-step motion of a single kinematic entity
//!
//! [`integrate`] applies jump, gravity, slope following, translation and yaw
//! slewing. [`resolve_single`] then pushes the entity's capsule out of
//! everything it overlaps. Kinematic entities are expected to be roots, so
//! local translation equals world translation.

use tracing::warn;

use crate::collider::{Aabb, Capsule, Collider};
use crate::collision::{intersect_ray_trimesh, Contact, Ray};
use crate::math::{horizontal, normalize_or, wrap_angle, yaw_of, yaw_toward, Quat, Vec3, EPSILON, UP};
use crate::world::{ContactRecord, EntityId, World};

use super::{PhysicsSettings, GROUNDED_DOT, MAX_RESOLVE_ITERATIONS};

/// Outcome of resolving one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepReport {
    pub iterations: u32,
    pub hit_cap: bool,
    pub grounded: bool,
}

fn world_capsule(world: &mut World, id: EntityId) -> Option<Capsule> {
    world.collider_proxy(id)?.collider.as_capsule().copied()
}

/// Rotate `intent` into the plane with normal `normal`, keeping its length.
pub(crate) fn onto_slope(intent: Vec3, normal: Vec3) -> Vec3 {
    let length = intent.length();
    if length <= EPSILON {
        return intent;
    }
    let projected = intent - normal * intent.dot(normal);
    normalize_or(projected, intent / length) * length
}

/// Upward-facing normal of the surface directly below the capsule, if any
/// lies within `probe` of its base.
fn ground_normal(world: &mut World, id: EntityId, capsule: &Capsule, probe: f64) -> Option<Vec3> {
    let origin = if capsule.bottom.y <= capsule.top.y {
        capsule.bottom
    } else {
        capsule.top
    };
    let reach = capsule.radius + probe;
    let area = Aabb::new(
        origin - Vec3::new(capsule.radius, reach, capsule.radius),
        origin + Vec3::new(capsule.radius, 0.0, capsule.radius),
    );
    let ray = Ray::new(origin, -UP);

    let mut best: Option<(f64, Vec3)> = None;
    for other in world.query(&area) {
        if other == id {
            continue;
        }
        let Some(proxy) = world.collider_proxy(other) else {
            continue;
        };
        let hit = match &proxy.collider {
            Collider::TriMesh(mesh) => intersect_ray_trimesh(&ray, mesh),
            Collider::Aabb(bbox) => intersect_ray_trimesh(&ray, &bbox.to_trimesh()),
            Collider::Capsule(_) => None,
        };
        if let Some(hit) = hit {
            if hit.distance <= reach && best.map_or(true, |(d, _)| hit.distance < d) {
                let normal = if hit.normal.y < 0.0 { -hit.normal } else { hit.normal };
                best = Some((hit.distance, normal));
            }
        }
    }
    best.map(|(_, n)| n)
}

fn slew_yaw(world: &mut World, id: EntityId, heading: Vec3, max_step: f64) {
    let Some(current) = world.get(id).map(|e| yaw_of(e.local_rotation())) else {
        return;
    };
    let target = yaw_toward(heading);
    let diff = wrap_angle(target - current);
    let next = if diff.abs() <= max_step {
        target
    } else {
        current + diff.signum() * max_step
    };
    if wrap_angle(next - current).abs() > EPSILON {
        world.set_local_rotation(id, Quat::from_rotation_y(next));
    }
}

/// Steps 1 to 4 of the kinematic step. Returns false when the entity is
/// missing, static or has no kinematic component.
pub fn integrate(world: &mut World, id: EntityId, dt: f64, settings: &PhysicsSettings) -> bool {
    let Some(entity) = world.get(id) else {
        return false;
    };
    if entity.is_static {
        return false;
    }
    let Some(mut kin) = entity.kinematic.clone() else {
        return false;
    };

    if kin.jump {
        kin.grounded = false;
        kin.accumulated_velocity += UP * settings.jump_impulse;
        kin.jump = false;
    }

    if kin.gravity_enabled {
        kin.accumulated_velocity -= UP * (settings.gravity * dt);
        kin.move_intent.y = 0.0;
        if let Some(capsule) = world_capsule(world, id) {
            if let Some(normal) = ground_normal(world, id, &capsule, settings.ground_probe_distance) {
                if normal.dot(UP) >= settings.slope_limit.cos() {
                    kin.move_intent = onto_slope(kin.move_intent, normal);
                }
            }
        }
    }

    kin.velocity = kin.move_intent * kin.speed;
    let delta = (kin.velocity + kin.accumulated_velocity) * dt;
    let heading = horizontal(kin.velocity);

    if let Some(e) = world.get_mut(id) {
        e.kinematic = Some(kin);
    }
    if delta != Vec3::ZERO {
        world.translate(id, delta);
    }
    if heading.length_squared() > EPSILON {
        slew_yaw(world, id, heading, settings.yaw_rate * dt);
    }
    true
}

/// Push the entity's capsule out of everything it overlaps, deepest contact
/// first. Only this entity moves.
pub fn resolve_single(world: &mut World, id: EntityId) -> StepReport {
    let mut report = StepReport::default();
    let Some(entity) = world.get(id) else {
        return report;
    };
    if entity.is_static {
        return report;
    }
    let Some(mine) = entity.collider().cloned() else {
        return report;
    };

    loop {
        if report.iterations >= MAX_RESOLVE_ITERATIONS {
            report.hit_cap = true;
            warn!(entity_id = id, iterations = report.iterations, "Collision resolution hit iteration cap");
            break;
        }
        let Some(proxy) = world.collider_proxy(id).cloned() else {
            break;
        };
        let Some(capsule) = proxy.collider.as_capsule().copied() else {
            break;
        };

        let mut deepest: Option<(EntityId, Contact)> = None;
        for other in world.query(&proxy.bounding_box) {
            if other == id {
                continue;
            }
            let accepted = world
                .get(other)
                .and_then(|e| e.collider())
                .is_some_and(|c| mine.accepts(c));
            if !accepted {
                continue;
            }
            let Some(other_proxy) = world.collider_proxy(other) else {
                continue;
            };
            if !other_proxy.bounding_box.intersects(&proxy.bounding_box) {
                continue;
            }
            for contact in other_proxy.contacts_for(&capsule) {
                if deepest.map_or(true, |(_, d)| contact.separating_distance > d.separating_distance) {
                    deepest = Some((other, contact));
                }
            }
        }

        let Some((other, contact)) = deepest else {
            break;
        };
        world.translate(id, contact.separating_vector);
        world.record_contact(
            id,
            ContactRecord {
                other,
                separating_vector: contact.separating_vector,
            },
        );
        report.iterations += 1;
        if normalize_or(contact.separating_vector, Vec3::ZERO).dot(UP) >= GROUNDED_DOT {
            report.grounded = true;
        }
    }
    report
}

/// Store the grounded flag; grounded entities lose their vertical velocity.
pub fn apply_grounded(world: &mut World, id: EntityId, grounded: bool) {
    if let Some(kin) = world.get_mut(id).and_then(|e| e.kinematic.as_mut()) {
        kin.grounded = grounded;
        if grounded {
            kin.accumulated_velocity.y = 0.0;
        }
    }
}

/// Full kinematic step: integrate, resolve, update grounded state and
/// re-index the entity.
pub fn kinematic_step(world: &mut World, id: EntityId, dt: f64, settings: &PhysicsSettings) -> Option<StepReport> {
    if !integrate(world, id, dt, settings) {
        return None;
    }
    let report = resolve_single(world, id);
    apply_grounded(world, id, report.grounded);
    world.index_entity(id);
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Capsule;
    use crate::math::approx_eq;
    use crate::world::{ColliderComponent, Entity, KinematicComponent, MeshComponent};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const DT: f64 = 0.016;

    fn ground(world: &mut World) -> EntityId {
        world
            .spawn(Entity::new("ground").with_mesh(MeshComponent::new("ground")).as_static())
            .unwrap()
    }

    fn body(world: &mut World, at: Vec3) -> EntityId {
        world
            .spawn(
                Entity::new("body")
                    .with_position(at)
                    .with_collider(ColliderComponent::capsule(Capsule::upright(40.0, 80.0)))
                    .with_kinematic(KinematicComponent::with_gravity(300.0)),
            )
            .unwrap()
    }

    #[test]
    fn falling_capsule_lands_and_grounds() {
        let mut world = World::default();
        ground(&mut world);
        let id = body(&mut world, Vec3::new(0.0, 100.0, 0.0));
        let settings = PhysicsSettings::default();

        for _ in 0..90 {
            kinematic_step(&mut world, id, DT, &settings).unwrap();
        }
        let e = world.get(id).unwrap();
        assert!(e.local_position().y.abs() < 1e-3, "y = {}", e.local_position().y);
        let kin = e.kinematic.as_ref().unwrap();
        assert!(kin.grounded);
        assert_eq!(kin.accumulated_velocity.y, 0.0);
    }

    #[test]
    fn jump_lifts_grounded_body() {
        let mut world = World::default();
        ground(&mut world);
        let id = body(&mut world, Vec3::ZERO);
        let settings = PhysicsSettings::default();
        kinematic_step(&mut world, id, DT, &settings).unwrap();

        world.get_mut(id).unwrap().kinematic.as_mut().unwrap().jump = true;
        kinematic_step(&mut world, id, DT, &settings).unwrap();
        let e = world.get(id).unwrap();
        assert!(e.local_position().y > 5.0);
        assert!(!e.kinematic.as_ref().unwrap().grounded);
        assert!(!e.kinematic.as_ref().unwrap().jump);
    }

    #[test]
    fn stacked_capsule_only_moves_caller() {
        let mut world = World::default();
        let cap = Capsule::upright(1.0, 2.0);
        let a = world
            .spawn(Entity::new("a").with_collider(ColliderComponent::capsule(cap)))
            .unwrap();
        let b = world
            .spawn(Entity::new("b").with_collider(ColliderComponent::capsule(cap)))
            .unwrap();

        let report = resolve_single(&mut world, a);
        assert_eq!(report.iterations, 1);
        assert!(report.grounded);
        assert!(approx_eq(world.get(a).unwrap().local_position(), Vec3::new(0.0, 4.0, 0.0), 1e-12));
        assert_eq!(world.get(b).unwrap().local_position(), Vec3::ZERO);
        assert_eq!(world.get(a).unwrap().frame_contacts()[0].other, b);
    }

    #[test]
    fn yaw_slews_then_snaps_toward_travel() {
        let mut world = World::default();
        let id = world
            .spawn(Entity::new("walker").with_kinematic(KinematicComponent {
                move_intent: Vec3::X,
                speed: 100.0,
                ..Default::default()
            }))
            .unwrap();
        let settings = PhysicsSettings::default();

        integrate(&mut world, id, DT, &settings);
        let yaw = yaw_of(world.get(id).unwrap().local_rotation());
        assert!((yaw + settings.yaw_rate * DT).abs() < 1e-9);

        for _ in 0..20 {
            integrate(&mut world, id, DT, &settings);
        }
        let yaw = yaw_of(world.get(id).unwrap().local_rotation());
        assert!((yaw + std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!((world.get(id).unwrap().local_position().x - 21.0 * 100.0 * DT).abs() < 1e-9);
    }

    #[test]
    fn intent_is_rotated_onto_slope() {
        let angle = 30f64.to_radians();
        let normal = Vec3::new(0.0, angle.cos(), angle.sin());
        let on_slope = onto_slope(Vec3::new(0.0, 0.0, -1.0), normal);
        assert!(approx_eq(on_slope, Vec3::new(0.0, 0.5, -(3f64.sqrt() / 2.0)), 1e-12));
        assert!((on_slope.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn static_entities_never_move() {
        let mut world = World::default();
        let cap = Capsule::upright(1.0, 2.0);
        let a = world
            .spawn(Entity::new("a").with_collider(ColliderComponent::capsule(cap)).as_static())
            .unwrap();
        world
            .spawn(Entity::new("b").with_collider(ColliderComponent::capsule(cap)))
            .unwrap();
        let report = resolve_single(&mut world, a);
        assert_eq!(report.iterations, 0);
        assert_eq!(world.get(a).unwrap().local_position(), Vec3::ZERO);
    }

    #[test]
    fn resolution_leaves_no_deep_contacts_unless_capped() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for _ in 0..20 {
            let mut world = World::default();
            ground(&mut world);
            for _ in 0..6 {
                let at = Vec3::new(rng.gen_range(-60.0..60.0), 0.0, rng.gen_range(-60.0..60.0));
                world
                    .spawn(
                        Entity::new("pillar")
                            .with_position(at)
                            .with_collider(ColliderComponent::capsule(Capsule::upright(20.0, 100.0)))
                            .as_static(),
                    )
                    .unwrap();
            }
            let id = body(&mut world, Vec3::new(0.0, -10.0, 0.0));
            let report = resolve_single(&mut world, id);
            if report.hit_cap {
                continue;
            }

            let proxy = world.collider_proxy(id).unwrap().clone();
            let capsule = *proxy.collider.as_capsule().unwrap();
            for other in world.query(&proxy.bounding_box) {
                if other == id {
                    continue;
                }
                let other_proxy = world.collider_proxy(other).unwrap();
                for contact in other_proxy.contacts_for(&capsule) {
                    assert!(contact.separating_distance <= 1e-6);
                }
            }
        }
    }
}
