//! Voxel heightfield rasterization

use serde::{Deserialize, Serialize};

use crate::collider::{Aabb, Triangle};

use super::NavMeshSettings;

/// Faces whose normal has at least this much vertical component are walkable.
/// Faces are treated as double-sided.
pub const WALKABLE_NORMAL_Y: f64 = 0.7;

/// Solid vertical interval of a column, in cell-height units above the
/// bounds' floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub min: i32,
    pub max: i32,
    pub walkable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightField {
    pub width: usize,
    pub depth: usize,
    pub bounds: Aabb,
    pub cell_size: f64,
    pub cell_height: f64,
    /// Spans per column, sorted by `min`, indexed `x + z * width`.
    pub columns: Vec<Vec<Span>>,
}

impl HeightField {
    pub fn new(bounds: Aabb, cell_size: f64, cell_height: f64) -> Self {
        let extents = bounds.max - bounds.min;
        let width = ((extents.x / cell_size).ceil() as usize).max(1);
        let depth = ((extents.z / cell_size).ceil() as usize).max(1);
        Self {
            width,
            depth,
            bounds,
            cell_size,
            cell_height,
            columns: vec![Vec::new(); width * depth],
        }
    }

    pub fn column(&self, x: usize, z: usize) -> &[Span] {
        &self.columns[x + z * self.width]
    }

    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn walkable_span_count(&self) -> usize {
        self.columns.iter().flatten().filter(|s| s.walkable).count()
    }

    pub fn is_empty(&self) -> bool {
        self.span_count() == 0
    }

    /// Insert a span, merging it with any span it overlaps.
    pub fn add_span(&mut self, x: usize, z: usize, mut span: Span) {
        let column = &mut self.columns[x + z * self.width];
        let mut i = 0;
        while i < column.len() {
            let existing = column[i];
            if existing.min > span.max || existing.max < span.min {
                i += 1;
                continue;
            }
            if existing.max > span.max {
                span.walkable = existing.walkable;
            } else if existing.max == span.max {
                span.walkable |= existing.walkable;
            }
            span.min = span.min.min(existing.min);
            span.max = span.max.max(existing.max);
            column.remove(i);
        }
        let at = column.partition_point(|s| s.min < span.min);
        column.insert(at, span);
    }

    /// Rasterize one triangle into every column its XZ footprint touches.
    pub fn rasterize_triangle(&mut self, triangle: &Triangle) {
        if triangle.is_degenerate() {
            return;
        }
        let walkable = triangle.normal.y.abs() > WALKABLE_NORMAL_Y;
        let tb = triangle.bounding_box();
        if !tb.intersects(&self.bounds) {
            return;
        }

        let bmin = self.bounds.min;
        let cs = self.cell_size;
        let x0 = (((tb.min.x - bmin.x) / cs).floor().max(0.0)) as usize;
        let z0 = (((tb.min.z - bmin.z) / cs).floor().max(0.0)) as usize;
        let x1 = ((((tb.max.x - bmin.x) / cs).floor()) as isize).clamp(0, self.width as isize - 1) as usize;
        let z1 = ((((tb.max.z - bmin.z) / cs).floor()) as isize).clamp(0, self.depth as isize - 1) as usize;
        let top = self.bounds.max.y - bmin.y;

        let polygon: Vec<[f64; 3]> = triangle.points.iter().map(|p| [p.x, p.y, p.z]).collect();
        for z in z0..=z1 {
            let cz0 = bmin.z + z as f64 * cs;
            let row = clip(&clip(&polygon, 2, cz0, true), 2, cz0 + cs, false);
            if row.len() < 3 {
                continue;
            }
            for x in x0..=x1 {
                let cx0 = bmin.x + x as f64 * cs;
                let cell = clip(&clip(&row, 0, cx0, true), 0, cx0 + cs, false);
                if cell.len() < 3 {
                    continue;
                }
                let ymin = cell.iter().map(|p| p[1]).fold(f64::INFINITY, f64::min) - bmin.y;
                let ymax = cell.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max) - bmin.y;
                if ymax < 0.0 || ymin > top {
                    continue;
                }
                let min = (ymin.max(0.0) / self.cell_height).floor() as i32;
                let max = ((ymax.min(top) / self.cell_height).ceil() as i32).max(min + 1);
                self.add_span(x, z, Span { min, max, walkable });
            }
        }
    }

    /// Clear the walkable flag on spans with less than `walkable_height`
    /// cells of free space above them.
    pub fn filter_low_clearance(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for i in 0..column.len() {
                let ceiling = column.get(i + 1).map(|s| s.min).unwrap_or(i32::MAX);
                if ceiling.saturating_sub(column[i].max) < walkable_height {
                    column[i].walkable = false;
                }
            }
        }
    }
}

/// Sutherland–Hodgman clip of a convex polygon against an axis-aligned plane.
/// Keeps the side `p[axis] >= value` when `keep_above`, else `p[axis] <= value`.
fn clip(polygon: &[[f64; 3]], axis: usize, value: f64, keep_above: bool) -> Vec<[f64; 3]> {
    let inside = |p: &[f64; 3]| {
        if keep_above {
            p[axis] >= value
        } else {
            p[axis] <= value
        }
    };
    let mut out = Vec::with_capacity(polygon.len() + 2);
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let (ina, inb) = (inside(&a), inside(&b));
        if ina {
            out.push(a);
        }
        if ina != inb {
            let t = (value - a[axis]) / (b[axis] - a[axis]);
            out.push([
                a[0] + (b[0] - a[0]) * t,
                a[1] + (b[1] - a[1]) * t,
                a[2] + (b[2] - a[2]) * t,
            ]);
        }
    }
    out
}

/// Rasterize every triangle and apply the clearance filter.
pub fn build_height_field<'a, I>(bounds: &Aabb, triangles: I, settings: &NavMeshSettings) -> HeightField
where
    I: IntoIterator<Item = &'a Triangle>,
{
    let mut field = HeightField::new(*bounds, settings.cell_size, settings.cell_height);
    for triangle in triangles {
        field.rasterize_triangle(triangle);
    }
    field.filter_low_clearance(settings.walkable_height_cells());
    field
}
