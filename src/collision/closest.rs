//! Closest-point queries between segments and triangles

use crate::collider::Triangle;
use crate::math::{Vec3, EPSILON};

/// Line segment between `a` and `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: Vec3,
    pub b: Vec3,
}

impl Line {
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self { a, b }
    }
}

/// Closest pair between two points sets, with the distance between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoints {
    pub first: Vec3,
    pub second: Vec3,
    pub distance: f64,
}

impl ClosestPoints {
    fn new(first: Vec3, second: Vec3) -> Self {
        Self {
            first,
            second,
            distance: (first - second).length(),
        }
    }

    /// Same pair viewed from the other side.
    pub fn swapped(self) -> Self {
        Self {
            first: self.second,
            second: self.first,
            distance: self.distance,
        }
    }
}

/// Closest point on segment `line` to `p`.
pub fn closest_point_on_segment(line: &Line, p: Vec3) -> Vec3 {
    let d = line.b - line.a;
    let len_sq = d.length_squared();
    if len_sq <= EPSILON * EPSILON {
        return line.a;
    }
    let t = ((p - line.a).dot(d) / len_sq).clamp(0.0, 1.0);
    line.a + d * t
}

/// Closest points between two segments. `first` lies on `l1`, `second` on `l2`.
///
/// Degenerate segments collapse to their start point; parallel segments clamp
/// the parameters into `[0, 1]`.
pub fn closest_points_segments(l1: &Line, l2: &Line) -> ClosestPoints {
    let d1 = l1.b - l1.a;
    let d2 = l2.b - l2.a;
    let r = l1.a - l2.a;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);
    let eps = EPSILON * EPSILON;

    if a <= eps && e <= eps {
        return ClosestPoints::new(l1.a, l2.a);
    }

    let (s, t);
    if a <= eps {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if e <= eps {
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            // Parallel segments give denom == 0; pick s = 0 and let the clamp
            // below find the matching t.
            let mut s0 = if denom > eps {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t0 = (b * s0 + f) / e;
            if t0 < 0.0 {
                t0 = 0.0;
                s0 = (-c / a).clamp(0.0, 1.0);
            } else if t0 > 1.0 {
                t0 = 1.0;
                s0 = ((b - c) / a).clamp(0.0, 1.0);
            }
            s = s0;
            t = t0;
        }
    }

    ClosestPoints::new(l1.a + d1 * s, l2.a + d2 * t)
}

/// Closest points between a segment and a triangle. `first` lies on the
/// triangle, `second` on the segment.
///
/// Takes the minimum over the three edge/segment tests and the projections of
/// the two segment endpoints onto the triangle plane that land inside it.
pub fn closest_points_line_triangle(line: &Line, triangle: &Triangle) -> ClosestPoints {
    let [a, b, c] = triangle.points;
    let edges = [Line::new(a, b), Line::new(b, c), Line::new(c, a)];

    let mut best = edges
        .iter()
        .map(|edge| closest_points_segments(edge, line))
        .min_by(|x, y| x.distance.total_cmp(&y.distance))
        .unwrap_or_else(|| ClosestPoints::new(a, line.a));

    if triangle.normal != Vec3::ZERO {
        for endpoint in [line.a, line.b] {
            let height = (endpoint - a).dot(triangle.normal);
            let projected = endpoint - triangle.normal * height;
            if triangle.contains_coplanar_point(projected) {
                let candidate = ClosestPoints::new(projected, endpoint);
                if candidate.distance < best.distance {
                    best = candidate;
                }
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::approx_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn perpendicular_segments_meet_at_midpoints() {
        let l1 = Line::new(Vec3::new(-1.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 0.0));
        let l2 = Line::new(Vec3::new(0.0, -1.0, -1.0), Vec3::new(0.0, -1.0, 1.0));
        let cp = closest_points_segments(&l1, &l2);
        assert!(approx_eq(cp.first, Vec3::new(0.0, 1.0, 0.0), 1e-12));
        assert!(approx_eq(cp.second, Vec3::new(0.0, -1.0, 0.0), 1e-12));
        assert!((cp.distance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_segments_behave_as_points() {
        let point = Line::new(Vec3::new(0.0, 3.0, 0.0), Vec3::new(0.0, 3.0, 0.0));
        let seg = Line::new(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let cp = closest_points_segments(&point, &seg);
        assert!(approx_eq(cp.second, Vec3::ZERO, 1e-12));
        assert!((cp.distance - 3.0).abs() < 1e-12);

        let both = closest_points_segments(&point, &point);
        assert_eq!(both.distance, 0.0);
    }

    #[test]
    fn parallel_segments_clamp_to_overlap() {
        let l1 = Line::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0));
        let l2 = Line::new(Vec3::new(2.0, 1.0, 0.0), Vec3::new(6.0, 1.0, 0.0));
        let cp = closest_points_segments(&l1, &l2);
        assert!((cp.distance - 1.0).abs() < 1e-12);
        assert!(cp.first.x >= 2.0 - 1e-12 && cp.first.x <= 4.0 + 1e-12);

        let far = Line::new(Vec3::new(10.0, 1.0, 0.0), Vec3::new(12.0, 1.0, 0.0));
        let cp = closest_points_segments(&l1, &far);
        assert!(approx_eq(cp.first, Vec3::new(4.0, 0.0, 0.0), 1e-12));
        assert!(approx_eq(cp.second, Vec3::new(10.0, 1.0, 0.0), 1e-12));
    }

    #[test]
    fn segment_closest_points_are_symmetric() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut v = || Vec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
        for _ in 0..500 {
            let l1 = Line::new(v(), v());
            let l2 = Line::new(v(), v());
            let forward = closest_points_segments(&l1, &l2);
            let backward = closest_points_segments(&l2, &l1);
            assert!((forward.distance - backward.distance).abs() < 1e-9);
            assert!(approx_eq(forward.first, backward.second, 1e-6));
            assert!(approx_eq(forward.second, backward.first, 1e-6));
        }
    }

    #[test]
    fn line_above_triangle_projects_onto_face() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, -1.0),
        );
        let line = Line::new(Vec3::new(0.0, 0.5, -0.5), Vec3::new(0.0, 10.0, -0.5));
        let cp = closest_points_line_triangle(&line, &tri);
        assert!((cp.distance - 0.5).abs() < 1e-12);
        assert!(approx_eq(cp.first, Vec3::new(0.0, 0.0, -0.5), 1e-12));
        assert!(approx_eq(cp.second, Vec3::new(0.0, 0.5, -0.5), 1e-12));
    }

    #[test]
    fn line_beside_triangle_uses_edges() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, -1.0),
        );
        let line = Line::new(Vec3::new(0.0, -1.0, 2.0), Vec3::new(0.0, 1.0, 2.0));
        let cp = closest_points_line_triangle(&line, &tri);
        assert!(approx_eq(cp.first, Vec3::ZERO, 1e-12));
        assert!((cp.distance - 2.0).abs() < 1e-12);
    }
}
