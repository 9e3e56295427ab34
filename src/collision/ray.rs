//! Ray casts against planes, triangles and triangle meshes

use crate::collider::{TriMesh, Triangle};
use crate::math::{Vec3, EPSILON};

/// Half-line starting at `origin`. `direction` is expected to be unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f64) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// A ray hit. `distance` is the ray parameter of the hit point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub distance: f64,
    pub normal: Vec3,
}

/// Intersect with the plane through `point` with normal `normal`.
/// Parallel rays and hits behind the origin return `None`.
pub fn intersect_ray_plane(ray: &Ray, point: Vec3, normal: Vec3) -> Option<RayHit> {
    let denom = normal.dot(ray.direction);
    if denom.abs() < EPSILON {
        return None;
    }
    let t = (point - ray.origin).dot(normal) / denom;
    if t < 0.0 {
        return None;
    }
    Some(RayHit {
        point: ray.at(t),
        distance: t,
        normal,
    })
}

/// Möller–Trumbore ray/triangle test. Both faces are hit.
pub fn intersect_ray_triangle(ray: &Ray, triangle: &Triangle) -> Option<RayHit> {
    let [a, b, c] = triangle.points;
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t < 0.0 {
        return None;
    }
    Some(RayHit {
        point: ray.at(t),
        distance: t,
        normal: triangle.normal,
    })
}

/// Nearest hit over every triangle of the mesh.
pub fn intersect_ray_trimesh(ray: &Ray, mesh: &TriMesh) -> Option<RayHit> {
    mesh.triangles
        .iter()
        .filter_map(|tri| intersect_ray_triangle(ray, tri))
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}
