//! Double-precision math primitives
//!
//! The simulation runs entirely in `f64`. These are thin aliases over glam's
//! double-precision types plus the handful of helpers the rest of the crate
//! keeps reaching for (transform composition, yaw extraction, approximate
//! comparison).

pub use glam::{DMat4 as Mat4, DQuat as Quat, DVec3 as Vec3, DVec4 as Vec4};

/// Tolerance used for "is this vector effectively zero" checks
pub const EPSILON: f64 = 1e-9;

/// World up axis
pub const UP: Vec3 = Vec3::Y;

/// Forward axis of an unrotated entity
pub const FORWARD: Vec3 = Vec3::NEG_Z;

/// Compose `translate(t) * rotate(r) * scale(s)`.
#[inline]
pub fn compose(translation: Vec3, rotation: Quat, scale: Vec3) -> Mat4 {
    Mat4::from_translation(translation) * Mat4::from_quat(rotation) * Mat4::from_scale(scale)
}

/// Normalize `v`, or return `fallback` when `v` has (near) zero length.
#[inline]
pub fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let len = v.length();
    if len > EPSILON {
        v / len
    } else {
        fallback
    }
}

/// Strip the vertical component of a vector.
#[inline]
pub fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Yaw (rotation about +Y) that turns `FORWARD` to face `dir` in the XZ plane.
#[inline]
pub fn yaw_toward(dir: Vec3) -> f64 {
    (-dir.x).atan2(-dir.z)
}

/// Yaw of a rotation, measured from where it sends `FORWARD`.
#[inline]
pub fn yaw_of(rotation: Quat) -> f64 {
    yaw_toward(rotation * FORWARD)
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let mut a = angle.rem_euclid(tau);
    if a > std::f64::consts::PI {
        a -= tau;
    }
    a
}

/// Linear interpolation between two points.
#[inline]
pub fn lerp(a: Vec3, b: Vec3, t: f64) -> Vec3 {
    a + (b - a) * t
}

/// Normalized quaternion interpolation along the shortest arc.
#[inline]
pub fn nlerp(a: Quat, b: Quat, t: f64) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    let q = Quat::from_xyzw(
        a.x + (b.x - a.x) * t,
        a.y + (b.y - a.y) * t,
        a.z + (b.z - a.z) * t,
        a.w + (b.w - a.w) * t,
    );
    let len = q.length();
    if len > EPSILON {
        q / len
    } else {
        a
    }
}

/// Component-wise comparison within `tolerance`.
#[inline]
pub fn approx_eq(a: Vec3, b: Vec3, tolerance: f64) -> bool {
    (a - b).abs().max_element() <= tolerance
}

/// Matrix comparison within `tolerance`.
#[inline]
pub fn mat_approx_eq(a: &Mat4, b: &Mat4, tolerance: f64) -> bool {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array().iter())
        .all(|(x, y)| (x - y).abs() <= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn compose_applies_scale_then_rotation_then_translation() {
        let m = compose(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_rotation_y(FRAC_PI_2),
            Vec3::splat(2.0),
        );
        // (1,0,0) scaled to (2,0,0), rotated about Y to (0,0,-2), then translated.
        let p = m.transform_point3(Vec3::X);
        assert!(approx_eq(p, Vec3::new(10.0, 0.0, -2.0), 1e-9));
    }

    #[test]
    fn yaw_round_trips_through_rotation() {
        for yaw in [-2.5, -1.0, 0.0, 0.3, 1.7, 3.0] {
            let q = Quat::from_rotation_y(yaw);
            assert!((wrap_angle(yaw_of(q) - yaw)).abs() < 1e-9);
        }
    }

    #[test]
    fn wrap_angle_stays_in_half_open_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-9);
        assert!((wrap_angle(-3.0 * PI) - PI).abs() < 1e-9);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn nlerp_takes_the_short_way_around() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.3);
        let mid = nlerp(a, b, 0.5);
        assert!((wrap_angle(yaw_of(mid) - 0.2)).abs() < 1e-3);
        assert!((mid.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn normalize_or_falls_back_on_zero() {
        assert_eq!(normalize_or(Vec3::ZERO, Vec3::Y), Vec3::Y);
        assert!(approx_eq(normalize_or(Vec3::new(3.0, 0.0, 4.0), Vec3::Y), Vec3::new(0.6, 0.0, 0.8), 1e-12));
    }
}
