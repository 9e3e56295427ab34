//! Collision checks: ray casts, closest points and contact generation
//!
//! Low-level routines here return `Option`s or plain vectors. Degenerate input
//! (zero-length segments, zero-area triangles) produces no contact rather than
//! an error.

pub mod closest;
pub mod contact;
pub mod ray;

pub use closest::{
    closest_point_on_segment, closest_points_line_triangle, closest_points_segments,
    ClosestPoints, Line,
};
pub use contact::{
    capsule_aabb, capsule_capsule, capsule_triangle, capsule_trimesh, collide, Contact,
    CONTACT_TOLERANCE,
};
pub use ray::{intersect_ray_plane, intersect_ray_triangle, intersect_ray_trimesh, Ray, RayHit};
