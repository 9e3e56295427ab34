//! Region outlines traced from the compact heightfield

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::math::Vec3;

use super::compact::{CompactHeightField, DIR_OFFSET_X, DIR_OFFSET_Z};
use super::region::NO_REGION;

/// Closed outline of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub region: u16,
    /// Simplified outline in world space.
    pub vertices: Vec<Vec3>,
    /// Every boundary corner before simplification, in world space.
    pub raw_vertices: Vec<Vec3>,
}

/// Corner in grid coordinates: `(x, y, z)` in cells.
type GridPoint = (i32, i32, i32);

const WALK_LIMIT: usize = 40_000;

/// Bitmask of directions in which span `i` borders a different region.
fn boundary_flags(chf: &CompactHeightField, i: usize) -> u8 {
    let region = chf.spans[i].region;
    let mut same = 0u8;
    for dir in 0..4 {
        if let Some(a) = chf.neighbour(i, dir) {
            if chf.spans[a].region == region {
                same |= 1 << dir;
            }
        }
    }
    same ^ 0xf
}

/// Walk the outline starting at span `start` facing `start_dir`, clearing
/// visited edges in `flags`.
fn walk_contour(chf: &CompactHeightField, flags: &mut [u8], start: usize, start_dir: usize) -> Vec<GridPoint> {
    let mut points = Vec::new();
    let mut i = start;
    let mut dir = start_dir;
    let (mut x, mut z) = {
        let (cx, cz) = chf.span_columns[start];
        (cx as i32, cz as i32)
    };

    for _ in 0..WALK_LIMIT {
        if flags[i] & (1 << dir) != 0 {
            let (mut px, mut pz) = (x, z);
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }
            points.push((px, chf.spans[i].y, pz));
            flags[i] &= !(1 << dir);
            dir = (dir + 1) % 4;
        } else {
            let Some(next) = chf.neighbour(i, dir) else {
                break;
            };
            x += DIR_OFFSET_X[dir];
            z += DIR_OFFSET_Z[dir];
            i = next;
            dir = (dir + 3) % 4;
        }
        if i == start && dir == start_dir {
            break;
        }
    }
    points
}

fn distance_sq_to_segment(p: GridPoint, a: GridPoint, b: GridPoint) -> f64 {
    let (px, pz) = (p.0 as f64, p.2 as f64);
    let (ax, az) = (a.0 as f64, a.2 as f64);
    let (dx, dz) = (b.0 as f64 - ax, b.2 as f64 - az);
    let len_sq = dx * dx + dz * dz;
    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (pz - az) * dz) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (ex, ez) = (ax + dx * t - px, az + dz * t - pz);
    ex * ex + ez * ez
}

/// Reduce a closed outline to the corners that deviate more than `max_error`
/// cells from the simplified edges. Returns indices into `raw`.
fn simplify(raw: &[GridPoint], max_error: f64) -> Vec<usize> {
    if raw.len() < 3 {
        return (0..raw.len()).collect();
    }
    let lower_left = (0..raw.len())
        .min_by_key(|&i| (raw[i].0, raw[i].2))
        .unwrap_or(0);
    let upper_right = (0..raw.len())
        .max_by_key(|&i| (raw[i].0, raw[i].2))
        .unwrap_or(0);
    let mut keep = vec![lower_left, upper_right];
    keep.sort_unstable();
    keep.dedup();

    let max_error_sq = max_error * max_error;
    let mut k = 0;
    while k < keep.len() {
        let a = keep[k];
        let b = keep[(k + 1) % keep.len()];
        let mut worst: Option<(f64, usize)> = None;
        let mut j = (a + 1) % raw.len();
        while j != b {
            let d = distance_sq_to_segment(raw[j], raw[a], raw[b]);
            if d > max_error_sq && worst.map_or(true, |(w, _)| d > w) {
                worst = Some((d, j));
            }
            j = (j + 1) % raw.len();
        }
        match worst {
            Some((_, j)) => keep.insert(k + 1, j),
            None => k += 1,
        }
        if keep.len() == 1 {
            break;
        }
    }
    keep
}

fn to_world(chf: &CompactHeightField, p: GridPoint) -> Vec3 {
    Vec3::new(
        chf.bounds.min.x + p.0 as f64 * chf.cell_size,
        chf.bounds.min.y + p.1 as f64 * chf.cell_height,
        chf.bounds.min.z + p.2 as f64 * chf.cell_size,
    )
}

/// Trace and simplify one outline per region boundary loop. Outlines with
/// fewer than three simplified vertices are dropped.
pub fn build_contours(chf: &CompactHeightField, max_error: f64) -> Vec<Contour> {
    let mut flags: Vec<u8> = (0..chf.span_count())
        .map(|i| {
            if chf.spans[i].region == NO_REGION {
                0
            } else {
                boundary_flags(chf, i)
            }
        })
        .collect();

    let mut contours = Vec::new();
    for i in 0..chf.span_count() {
        if flags[i] == 0 || flags[i] == 0xf {
            if flags[i] == 0xf {
                // Single-span region: every side is an edge.
                flags[i] = 0;
            }
            continue;
        }
        let start_dir = (0..4).find(|d| flags[i] & (1 << d) != 0).unwrap_or(0);
        let raw = walk_contour(chf, &mut flags, i, start_dir);
        let kept = simplify(&raw, max_error);
        if kept.len() < 3 {
            debug!(region = chf.spans[i].region, raw = raw.len(), "Dropping degenerate contour");
            continue;
        }
        contours.push(Contour {
            region: chf.spans[i].region,
            vertices: kept.iter().map(|&k| to_world(chf, raw[k])).collect(),
            raw_vertices: raw.iter().map(|&p| to_world(chf, p)).collect(),
        });
    }
    contours
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Aabb;
    use crate::navmesh::heightfield::{HeightField, Span};

    fn square_region(size: usize) -> CompactHeightField {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(size as f64, 10.0, size as f64));
        let mut field = HeightField::new(bounds, 1.0, 1.0);
        for z in 0..size {
            for x in 0..size {
                field.add_span(x, z, Span { min: 0, max: 1, walkable: true });
            }
        }
        let mut chf = CompactHeightField::build(&field, 2, 1);
        for span in &mut chf.spans {
            span.region = 1;
        }
        chf
    }

    #[test]
    fn square_traces_to_four_corners() {
        let chf = square_region(4);
        let contours = build_contours(&chf, 1.3);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert_eq!(c.raw_vertices.len(), 16);
        assert_eq!(c.vertices.len(), 4);
        for corner in [
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(4.0, 1.0, 0.0),
            Vec3::new(4.0, 1.0, 4.0),
            Vec3::new(0.0, 1.0, 4.0),
        ] {
            assert!(c.vertices.contains(&corner), "missing {corner:?}");
        }
    }

    #[test]
    fn simplify_keeps_deviating_points() {
        let raw = vec![(0, 0, 0), (2, 0, 0), (4, 0, 0), (4, 0, 4), (2, 0, 6), (0, 0, 4)];
        let kept = simplify(&raw, 0.5);
        assert!(kept.contains(&0));
        assert!(kept.contains(&4));
        assert!(kept.contains(&3));
        assert!(!kept.contains(&1));
    }
}
