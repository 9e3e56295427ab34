//! Narrow-phase contact generation
//!
//! Every contact is expressed from the point of view of the capsule being
//! tested: translating that capsule by `separating_vector` removes the
//! penetration.

use crate::collider::{Aabb, Capsule, Collider, TriMesh, Triangle};
use crate::math::{normalize_or, Vec3, EPSILON, UP};

use super::closest::{closest_points_line_triangle, closest_points_segments, Line};

/// Contacts at or below this depth are treated as resolved.
pub const CONTACT_TOLERANCE: f64 = 5e-5;

/// Result of a narrow-phase test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Translation that pushes the tested shape out of the other one.
    pub separating_vector: Vec3,
    /// Length of `separating_vector`.
    pub separating_distance: f64,
    /// Triangle index inside a mesh, when the other shape is a mesh.
    pub triangle_index: Option<usize>,
}

impl Contact {
    fn new(separating_vector: Vec3, triangle_index: Option<usize>) -> Self {
        Self {
            separating_vector,
            separating_distance: separating_vector.length(),
            triangle_index,
        }
    }

    /// The same contact seen from the other shape.
    pub fn reversed(self) -> Self {
        Self {
            separating_vector: -self.separating_vector,
            ..self
        }
    }
}

fn axis(capsule: &Capsule) -> Line {
    Line::new(capsule.bottom, capsule.top)
}

/// Capsule against a single triangle.
///
/// A capsule whose axis ends up behind the face is pushed through to the
/// front side rather than further back.
pub fn capsule_triangle(capsule: &Capsule, triangle: &Triangle) -> Option<Contact> {
    if triangle.is_degenerate() {
        return None;
    }
    let cp = closest_points_line_triangle(&axis(capsule), triangle);
    if cp.distance >= capsule.radius {
        return None;
    }

    let direction = normalize_or(cp.second - cp.first, triangle.normal);
    let mut separating_vector = direction * (capsule.radius - cp.distance);
    if separating_vector.dot(triangle.normal) < 0.0 {
        separating_vector = -separating_vector + triangle.normal * (2.0 * capsule.radius);
    }
    Some(Contact::new(separating_vector, None))
}

/// Capsule against every triangle of a mesh. Shallow contacts are dropped.
pub fn capsule_trimesh(capsule: &Capsule, mesh: &TriMesh) -> Vec<Contact> {
    let bbox = capsule.bounding_box();
    mesh.triangles
        .iter()
        .enumerate()
        .filter(|(_, tri)| tri.bounding_box().intersects(&bbox))
        .filter_map(|(i, tri)| {
            capsule_triangle(capsule, tri).map(|c| Contact {
                triangle_index: Some(i),
                ..c
            })
        })
        .filter(|c| c.separating_distance > CONTACT_TOLERANCE)
        .collect()
}

/// Capsule `a` against capsule `b`; the contact moves `a`.
///
/// Coincident axes have no separating direction, so `a` is pushed straight up
/// over `b`.
pub fn capsule_capsule(a: &Capsule, b: &Capsule) -> Option<Contact> {
    let cp = closest_points_segments(&axis(a), &axis(b));
    let reach = a.radius + b.radius;
    if cp.distance >= reach {
        return None;
    }

    let separating_vector = if cp.distance <= EPSILON {
        UP * (b.length() + reach)
    } else {
        (cp.first - cp.second) / cp.distance * (reach - cp.distance)
    };
    let contact = Contact::new(separating_vector, None);
    (contact.separating_distance > CONTACT_TOLERANCE).then_some(contact)
}

/// Capsule against a bounding-box-only collider, treated as its twelve faces.
pub fn capsule_aabb(capsule: &Capsule, bbox: &Aabb) -> Vec<Contact> {
    if !capsule.bounding_box().intersects(bbox) {
        return Vec::new();
    }
    capsule_trimesh(capsule, &bbox.to_trimesh())
}

/// Contacts that move `mover` out of `other`.
///
/// Only pairs with at least one capsule produce contacts; mesh/mesh and
/// box/box pairs are never resolved.
pub fn collide(mover: &Collider, other: &Collider) -> Vec<Contact> {
    match (mover, other) {
        (Collider::Capsule(a), Collider::Capsule(b)) => capsule_capsule(a, b).into_iter().collect(),
        (Collider::Capsule(a), Collider::TriMesh(mesh)) => capsule_trimesh(a, mesh),
        (Collider::Capsule(a), Collider::Aabb(bbox)) => capsule_aabb(a, bbox),
        (Collider::TriMesh(mesh), Collider::Capsule(b)) => {
            capsule_trimesh(b, mesh).into_iter().map(Contact::reversed).collect()
        }
        (Collider::Aabb(bbox), Collider::Capsule(b)) => {
            capsule_aabb(b, bbox).into_iter().map(Contact::reversed).collect()
        }
        (Collider::TriMesh(_), Collider::TriMesh(_))
        | (Collider::TriMesh(_), Collider::Aabb(_))
        | (Collider::Aabb(_), Collider::TriMesh(_))
        | (Collider::Aabb(_), Collider::Aabb(_)) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::approx_eq;

    fn capsule(radius: f64, bottom: Vec3, top: Vec3) -> Capsule {
        Capsule { radius, bottom, top }
    }

    #[test]
    fn stacked_capsules_push_up_by_length_plus_diameter() {
        let a = capsule(1.0, Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        let b = capsule(1.0, Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        let contact = capsule_capsule(&a, &b).unwrap();
        assert!(approx_eq(contact.separating_vector, Vec3::new(0.0, 4.0, 0.0), 1e-12));
        assert!((contact.separating_distance - 4.0).abs() < 1e-12);
    }

    #[test]
    fn side_by_side_capsules_push_apart_horizontally() {
        let a = capsule(1.0, Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        let b = capsule(1.0, Vec3::new(1.5, 0.0, 0.0), Vec3::new(1.5, 2.0, 0.0));
        let contact = capsule_capsule(&a, &b).unwrap();
        assert!(approx_eq(contact.separating_vector, Vec3::new(-0.5, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn separated_capsules_have_no_contact() {
        let a = capsule(1.0, Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0));
        let b = capsule(1.0, Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 2.0, 0.0));
        assert!(capsule_capsule(&a, &b).is_none());
    }

    #[test]
    fn capsule_sunk_into_triangle_is_pushed_out_by_half_unit() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, -1.0),
        );
        let c = capsule(1.0, Vec3::new(0.0, 0.5, -0.5), Vec3::new(0.0, 10.0, -0.5));
        let contact = capsule_triangle(&c, &tri).unwrap();
        assert!((contact.separating_distance - 0.5).abs() < 1e-12);
        assert!(approx_eq(contact.separating_vector, Vec3::new(0.0, 0.5, 0.0), 1e-12));
    }

    #[test]
    fn capsule_behind_triangle_is_pushed_to_front() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, -1.0),
        );
        let c = capsule(1.0, Vec3::new(0.0, -10.0, -0.5), Vec3::new(0.0, -0.5, -0.5));
        let contact = capsule_triangle(&c, &tri).unwrap();
        assert!(contact.separating_vector.dot(tri.normal) > 0.0);
        assert!((contact.separating_vector.y - 2.5).abs() < 1e-12);
    }

    #[test]
    fn trimesh_drops_contacts_at_tolerance() {
        let mesh = TriMesh {
            triangles: vec![Triangle::new(
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(-1.0, 0.0, -1.0),
            )],
        };
        let grazing = capsule(1.0, Vec3::new(0.0, 1.0 - 1e-5, -0.5), Vec3::new(0.0, 5.0, -0.5));
        assert!(capsule_trimesh(&grazing, &mesh).is_empty());

        let sunk = capsule(1.0, Vec3::new(0.0, 0.5, -0.5), Vec3::new(0.0, 5.0, -0.5));
        let contacts = capsule_trimesh(&sunk, &mesh);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].triangle_index, Some(0));
    }

    #[test]
    fn collide_reverses_mesh_first_pairs() {
        let mesh = Collider::Aabb(Aabb::new(Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0)));
        let body = Collider::Capsule(capsule(1.0, Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, 2.5, 0.0)));
        let from_capsule = collide(&body, &mesh);
        let from_mesh = collide(&mesh, &body);
        assert!(!from_capsule.is_empty());
        let deepest = from_capsule
            .iter()
            .max_by(|a, b| a.separating_distance.total_cmp(&b.separating_distance))
            .unwrap();
        assert!(deepest.separating_vector.y > 0.0);
        assert!(from_mesh.iter().all(|c| c.separating_vector.y <= 1e-12));
        assert!(collide(&mesh, &mesh).is_empty());
    }
}
