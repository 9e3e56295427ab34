//! Collider primitives
//!
//! Plain geometric shapes in double precision. Nothing here knows about
//! entities; the world layer owns the local shapes and caches their
//! transformed proxies.

use serde::{Deserialize, Serialize};

use crate::math::{normalize_or, Mat4, Vec3, EPSILON};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Smallest box containing every point. `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    /// Inclusive overlap test. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expand(&self, margin: f64) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    pub fn translate(&self, delta: Vec3) -> Aabb {
        Aabb {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Box around the eight transformed corners.
    pub fn transform(&self, m: &Mat4) -> Aabb {
        let corners = self.corners().map(|c| m.transform_point3(c));
        // Eight corners, never empty.
        Aabb::from_points(corners).unwrap_or(*self)
    }

    /// The six faces as twelve outward-facing triangles.
    pub fn to_trimesh(&self) -> TriMesh {
        let c = self.corners();
        // Corner index bits: x = 1, y = 2, z = 4.
        const FACES: [[usize; 4]; 6] = [
            [0, 4, 6, 2], // -X
            [1, 3, 7, 5], // +X
            [0, 1, 5, 4], // -Y
            [2, 6, 7, 3], // +Y
            [0, 2, 3, 1], // -Z
            [4, 5, 7, 6], // +Z
        ];
        let mut triangles = Vec::with_capacity(12);
        for f in FACES {
            triangles.push(Triangle::new(c[f[0]], c[f[1]], c[f[2]]));
            triangles.push(Triangle::new(c[f[0]], c[f[2]], c[f[3]]));
        }
        TriMesh { triangles }
    }
}

/// A line segment swept by a sphere. `bottom` and `top` are the axis endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub radius: f64,
    pub bottom: Vec3,
    pub top: Vec3,
}

impl Capsule {
    /// Upright capsule whose lowest point sits at the local origin.
    pub fn upright(radius: f64, length: f64) -> Self {
        Self {
            radius,
            bottom: Vec3::new(0.0, radius, 0.0),
            top: Vec3::new(0.0, radius + length, 0.0),
        }
    }

    /// Axial length (distance between the two axis endpoints).
    pub fn length(&self) -> f64 {
        (self.top - self.bottom).length()
    }

    /// Lowest point on the capsule surface along -Y.
    pub fn base(&self) -> Vec3 {
        let low = if self.bottom.y <= self.top.y {
            self.bottom
        } else {
            self.top
        };
        low - Vec3::new(0.0, self.radius, 0.0)
    }

    pub fn transform(&self, m: &Mat4) -> Capsule {
        Capsule {
            radius: self.radius,
            bottom: m.transform_point3(self.bottom),
            top: m.transform_point3(self.top),
        }
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb {
            min: self.bottom.min(self.top) - Vec3::splat(self.radius),
            max: self.bottom.max(self.top) + Vec3::splat(self.radius),
        }
    }
}

/// A single triangle with a cached unit normal. Winding is counter-clockwise
/// around the normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub points: [Vec3; 3],
    pub normal: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = normalize_or((b - a).cross(c - a), Vec3::ZERO);
        Self {
            points: [a, b, c],
            normal,
        }
    }

    pub fn area(&self) -> f64 {
        let [a, b, c] = self.points;
        (b - a).cross(c - a).length() * 0.5
    }

    /// Zero-area triangles have no usable normal.
    pub fn is_degenerate(&self) -> bool {
        self.normal == Vec3::ZERO || self.area() <= EPSILON
    }

    pub fn transform(&self, m: &Mat4) -> Triangle {
        let [a, b, c] = self.points;
        Triangle::new(
            m.transform_point3(a),
            m.transform_point3(b),
            m.transform_point3(c),
        )
    }

    pub fn bounding_box(&self) -> Aabb {
        let [a, b, c] = self.points;
        Aabb {
            min: a.min(b).min(c),
            max: a.max(b).max(c),
        }
    }

    /// Whether `p`, assumed to lie on the triangle's plane, is inside the
    /// triangle (edges included).
    pub fn contains_coplanar_point(&self, p: Vec3) -> bool {
        let [a, b, c] = self.points;
        let n = self.normal;
        let e0 = (b - a).cross(p - a).dot(n);
        let e1 = (c - b).cross(p - b).dot(n);
        let e2 = (a - c).cross(p - c).dot(n);
        let tol = -EPSILON;
        e0 >= tol && e1 >= tol && e2 >= tol
    }
}

/// Collection of triangles treated as a single collider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriMesh {
    pub triangles: Vec<Triangle>,
}

impl TriMesh {
    /// Build from indexed geometry, dropping degenerate and out-of-range faces.
    pub fn from_indexed(positions: &[Vec3], indices: &[u32]) -> Self {
        let triangles = indices
            .chunks_exact(3)
            .filter_map(|face| {
                let a = *positions.get(face[0] as usize)?;
                let b = *positions.get(face[1] as usize)?;
                let c = *positions.get(face[2] as usize)?;
                let tri = Triangle::new(a, b, c);
                (!tri.is_degenerate()).then_some(tri)
            })
            .collect();
        Self { triangles }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn transform(&self, m: &Mat4) -> TriMesh {
        TriMesh {
            triangles: self.triangles.iter().map(|t| t.transform(m)).collect(),
        }
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.triangles.iter().flat_map(|t| t.points))
    }
}

/// The narrow-phase shape an entity collides with.
#[derive(Debug, Clone, PartialEq)]
pub enum Collider {
    Capsule(Capsule),
    TriMesh(TriMesh),
    Aabb(Aabb),
}

impl Collider {
    pub fn transform(&self, m: &Mat4) -> Collider {
        match self {
            Collider::Capsule(c) => Collider::Capsule(c.transform(m)),
            Collider::TriMesh(t) => Collider::TriMesh(t.transform(m)),
            Collider::Aabb(b) => Collider::Aabb(b.transform(m)),
        }
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        match self {
            Collider::Capsule(c) => Some(c.bounding_box()),
            Collider::TriMesh(t) => t.bounding_box(),
            Collider::Aabb(b) => Some(*b),
        }
    }

    pub fn as_capsule(&self) -> Option<&Capsule> {
        match self {
            Collider::Capsule(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq, compose, Quat};

    #[test]
    fn aabb_overlap_is_inclusive() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::ONE, Vec3::splat(2.0));
        let c = Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn aabb_new_orders_corners() {
        let a = Aabb::new(Vec3::new(1.0, -1.0, 2.0), Vec3::new(-1.0, 1.0, 0.0));
        assert_eq!(a.min, Vec3::new(-1.0, -1.0, 0.0));
        assert_eq!(a.max, Vec3::new(1.0, 1.0, 2.0));
    }

    #[test]
    fn box_trimesh_normals_point_outward() {
        let b = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let mesh = b.to_trimesh();
        assert_eq!(mesh.triangles.len(), 12);
        for tri in &mesh.triangles {
            let centroid = (tri.points[0] + tri.points[1] + tri.points[2]) / 3.0;
            assert!(tri.normal.dot(centroid) > 0.0, "inward face {:?}", tri);
        }
    }

    #[test]
    fn upright_capsule_rests_on_origin() {
        let c = Capsule::upright(40.0, 80.0);
        assert!(approx_eq(c.base(), Vec3::ZERO, 1e-12));
        assert_eq!(c.length(), 80.0);
        let bb = c.bounding_box();
        assert_eq!(bb.min, Vec3::new(-40.0, 0.0, -40.0));
        assert_eq!(bb.max, Vec3::new(40.0, 160.0, 40.0));
    }

    #[test]
    fn capsule_transform_keeps_radius() {
        let c = Capsule::upright(1.0, 2.0);
        let m = compose(Vec3::new(5.0, 0.0, 0.0), Quat::IDENTITY, Vec3::splat(3.0));
        let t = c.transform(&m);
        assert_eq!(t.radius, 1.0);
        assert!(approx_eq(t.bottom, Vec3::new(5.0, 3.0, 0.0), 1e-12));
    }

    #[test]
    fn indexed_mesh_skips_degenerate_and_out_of_range_faces() {
        let positions = [
            Vec3::ZERO,
            Vec3::X,
            Vec3::Z,
            Vec3::new(2.0, 0.0, 0.0),
        ];
        let indices = [0, 2, 1, 0, 1, 3, 0, 1, 9];
        let mesh = TriMesh::from_indexed(&positions, &indices);
        assert_eq!(mesh.triangles.len(), 1);
        assert!(approx_eq(mesh.triangles[0].normal, Vec3::Y, 1e-12));
    }

    #[test]
    fn coplanar_point_containment() {
        let tri = Triangle::new(Vec3::ZERO, Vec3::new(1.0, 0.0, -1.0), Vec3::new(-1.0, 0.0, -1.0));
        assert!(tri.contains_coplanar_point(Vec3::new(0.0, 0.0, -0.5)));
        assert!(!tri.contains_coplanar_point(Vec3::new(0.0, 0.0, 0.5)));
        assert!(tri.contains_coplanar_point(Vec3::ZERO));
    }
}
