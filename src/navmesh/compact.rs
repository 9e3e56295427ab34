//! Compact heightfield: walkable spans only, with neighbour links

use serde::{Deserialize, Serialize};

use crate::collider::Aabb;

use super::heightfield::HeightField;

/// Column offsets for the four neighbour directions.
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// Clearance assigned to spans with nothing above them.
const OPEN_SKY: i32 = 0xffff;

/// Index range of a column's spans inside `CompactHeightField::spans`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactCell {
    pub index: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSpan {
    /// Floor height in cell-height units.
    pub y: i32,
    /// Free space above the floor.
    pub h: i32,
    /// Span index of the connected neighbour in each direction.
    pub connections: [Option<usize>; 4],
    pub region: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactHeightField {
    pub width: usize,
    pub depth: usize,
    pub bounds: Aabb,
    pub cell_size: f64,
    pub cell_height: f64,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Column coordinates of each span, parallel to `spans`.
    pub span_columns: Vec<(usize, usize)>,
}

impl CompactHeightField {
    /// Pack the walkable spans of `field` and link neighbours whose floors
    /// differ by at most `climbable` and share `walkable_height` of headroom.
    pub fn build(field: &HeightField, walkable_height: i32, climbable: i32) -> Self {
        let mut cells = Vec::with_capacity(field.width * field.depth);
        let mut spans = Vec::new();
        let mut span_columns = Vec::new();

        for z in 0..field.depth {
            for x in 0..field.width {
                let column = field.column(x, z);
                let index = spans.len();
                for (i, span) in column.iter().enumerate() {
                    if !span.walkable {
                        continue;
                    }
                    let ceiling = column.get(i + 1).map(|s| s.min).unwrap_or(OPEN_SKY);
                    spans.push(CompactSpan {
                        y: span.max,
                        h: (ceiling - span.max).clamp(0, OPEN_SKY),
                        connections: [None; 4],
                        region: 0,
                    });
                    span_columns.push((x, z));
                }
                cells.push(CompactCell {
                    index,
                    count: spans.len() - index,
                });
            }
        }

        let mut chf = Self {
            width: field.width,
            depth: field.depth,
            bounds: field.bounds,
            cell_size: field.cell_size,
            cell_height: field.cell_height,
            cells,
            spans,
            span_columns,
        };
        chf.link_neighbours(walkable_height, climbable);
        chf
    }

    fn link_neighbours(&mut self, walkable_height: i32, climbable: i32) {
        for i in 0..self.spans.len() {
            let (x, z) = self.span_columns[i];
            for dir in 0..4 {
                let Some(cell) = self.neighbour_cell(x, z, dir) else {
                    continue;
                };
                let (y, h) = (self.spans[i].y, self.spans[i].h);
                let found = (cell.index..cell.index + cell.count).find(|&n| {
                    let ns = &self.spans[n];
                    let bottom = y.max(ns.y);
                    let top = (y + h).min(ns.y + ns.h);
                    top - bottom >= walkable_height && (ns.y - y).abs() <= climbable
                });
                self.spans[i].connections[dir] = found;
            }
        }
    }

    pub fn cell(&self, x: usize, z: usize) -> CompactCell {
        self.cells[x + z * self.width]
    }

    pub fn neighbour_cell(&self, x: usize, z: usize, dir: usize) -> Option<CompactCell> {
        let nx = x as i32 + DIR_OFFSET_X[dir];
        let nz = z as i32 + DIR_OFFSET_Z[dir];
        if nx < 0 || nz < 0 || nx >= self.width as i32 || nz >= self.depth as i32 {
            return None;
        }
        Some(self.cell(nx as usize, nz as usize))
    }

    pub fn neighbour(&self, span: usize, dir: usize) -> Option<usize> {
        self.spans[span].connections[dir]
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
