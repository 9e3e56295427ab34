//! Uniform 3-D grid used as the collision broad phase

use std::collections::{BTreeSet, HashMap};

use crate::collider::Aabb;
use crate::math::Vec3;

use super::entity::EntityId;

pub const DEFAULT_PARTITION_COUNT: usize = 32;
pub const DEFAULT_PARTITION_DIMENSION: f64 = 500.0;

/// Inclusive cell coordinate range per axis.
type CellRange = [(usize, usize); 3];

/// `count^3` cubic cells of side `dimension`, centred on the origin.
///
/// Every indexed entity remembers the box it was indexed with and the cells
/// that box covered, so re-indexing an entity that has not moved is free.
#[derive(Debug, Clone)]
pub struct SpatialPartition {
    count: usize,
    dimension: f64,
    cells: Vec<BTreeSet<EntityId>>,
    entity_cells: HashMap<EntityId, Vec<usize>>,
    entity_boxes: HashMap<EntityId, Aabb>,
}

impl Default for SpatialPartition {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_COUNT, DEFAULT_PARTITION_DIMENSION)
    }
}

impl SpatialPartition {
    pub fn new(count: usize, dimension: f64) -> Self {
        let count = count.max(1);
        Self {
            count,
            dimension,
            cells: vec![BTreeSet::new(); count * count * count],
            entity_cells: HashMap::new(),
            entity_boxes: HashMap::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dimension(&self) -> f64 {
        self.dimension
    }

    /// World-space box covered by the grid.
    pub fn bounds(&self) -> Aabb {
        let half = self.half_extent();
        Aabb::new(Vec3::splat(-half), Vec3::splat(half))
    }

    fn half_extent(&self) -> f64 {
        self.count as f64 * self.dimension * 0.5
    }

    fn axis_range(&self, min: f64, max: f64) -> Option<(usize, usize)> {
        let half = self.half_extent();
        let lo = ((min + half) / self.dimension).floor();
        let hi = ((max + half) / self.dimension).floor();
        let last = (self.count - 1) as f64;
        if hi < 0.0 || lo > last || lo.is_nan() || hi.is_nan() {
            return None;
        }
        Some((lo.clamp(0.0, last) as usize, hi.clamp(0.0, last) as usize))
    }

    fn cell_range(&self, aabb: &Aabb) -> Option<CellRange> {
        Some([
            self.axis_range(aabb.min.x, aabb.max.x)?,
            self.axis_range(aabb.min.y, aabb.max.y)?,
            self.axis_range(aabb.min.z, aabb.max.z)?,
        ])
    }

    fn cell_index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.count + y) * self.count + z
    }

    /// Indices of every cell the box overlaps, in ascending order. Empty when
    /// the box lies entirely outside the grid.
    pub fn cells_for(&self, aabb: &Aabb) -> Vec<usize> {
        let Some([(x0, x1), (y0, y1), (z0, z1)]) = self.cell_range(aabb) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity((x1 - x0 + 1) * (y1 - y0 + 1) * (z1 - z0 + 1));
        for x in x0..=x1 {
            for y in y0..=y1 {
                for z in z0..=z1 {
                    out.push(self.cell_index(x, y, z));
                }
            }
        }
        out
    }

    /// Record `id` in every cell `aabb` overlaps, replacing its previous cells.
    pub fn index(&mut self, id: EntityId, aabb: Aabb) {
        if self.entity_boxes.get(&id) == Some(&aabb) {
            return;
        }
        let new_cells = self.cells_for(&aabb);
        let old_cells = self.entity_cells.remove(&id).unwrap_or_default();

        for cell in old_cells.iter().filter(|c| new_cells.binary_search(c).is_err()) {
            self.cells[*cell].remove(&id);
        }
        for cell in new_cells.iter().filter(|c| old_cells.binary_search(c).is_err()) {
            self.cells[*cell].insert(id);
        }

        self.entity_cells.insert(id, new_cells);
        self.entity_boxes.insert(id, aabb);
    }

    pub fn delete(&mut self, id: EntityId) {
        if let Some(cells) = self.entity_cells.remove(&id) {
            for cell in cells {
                self.cells[cell].remove(&id);
            }
        }
        self.entity_boxes.remove(&id);
    }

    /// Every entity sharing at least one cell with `aabb`, sorted, each once.
    pub fn query(&self, aabb: &Aabb) -> Vec<EntityId> {
        let mut found = BTreeSet::new();
        for cell in self.cells_for(aabb) {
            found.extend(self.cells[cell].iter().copied());
        }
        found.into_iter().collect()
    }

    pub fn indexed_box(&self, id: EntityId) -> Option<&Aabb> {
        self.entity_boxes.get(&id)
    }

    pub fn is_indexed(&self, id: EntityId) -> bool {
        self.entity_cells.contains_key(&id)
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.entity_cells.clear();
        self.entity_boxes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn cube(center: Vec3, half: f64) -> Aabb {
        Aabb::new(center - Vec3::splat(half), center + Vec3::splat(half))
    }

    #[test]
    fn query_finds_overlapping_entities_once() {
        let mut grid = SpatialPartition::new(8, 10.0);
        grid.index(1, cube(Vec3::ZERO, 12.0));
        grid.index(2, cube(Vec3::new(30.0, 0.0, 0.0), 1.0));

        let hits = grid.query(&cube(Vec3::new(1.0, 1.0, 1.0), 3.0));
        assert_eq!(hits, vec![1]);

        let all = grid.query(&grid.bounds());
        assert_eq!(all, vec![1, 2]);
    }

    #[test]
    fn reindex_moves_entity_between_cells() {
        let mut grid = SpatialPartition::new(8, 10.0);
        grid.index(5, cube(Vec3::new(-25.0, 0.0, 0.0), 1.0));
        grid.index(5, cube(Vec3::new(25.0, 0.0, 0.0), 1.0));
        assert!(grid.query(&cube(Vec3::new(-25.0, 0.0, 0.0), 1.0)).is_empty());
        assert_eq!(grid.query(&cube(Vec3::new(25.0, 0.0, 0.0), 1.0)), vec![5]);
    }

    #[test]
    fn outside_boxes_have_empty_coverage_and_edges_clamp() {
        let grid = SpatialPartition::new(4, 10.0);
        assert!(grid.cells_for(&cube(Vec3::new(100.0, 0.0, 0.0), 1.0)).is_empty());
        // Straddles the +x face: clamped into the last column.
        let clamped = grid.cells_for(&Aabb::new(Vec3::new(15.0, 0.0, 0.0), Vec3::new(500.0, 1.0, 1.0)));
        assert_eq!(clamped.len(), 1);
    }

    #[test]
    fn delete_removes_from_every_cell() {
        let mut grid = SpatialPartition::new(8, 10.0);
        grid.index(3, cube(Vec3::ZERO, 25.0));
        grid.delete(3);
        assert!(grid.query(&grid.bounds()).is_empty());
        assert!(!grid.is_indexed(3));
    }

    #[test]
    fn query_is_complete_for_random_boxes() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut grid = SpatialPartition::new(16, 25.0);
        let mut boxes = Vec::new();
        for id in 0..200u32 {
            let c = Vec3::new(
                rng.gen_range(-180.0..180.0),
                rng.gen_range(-180.0..180.0),
                rng.gen_range(-180.0..180.0),
            );
            let b = cube(c, rng.gen_range(0.5..30.0));
            grid.index(id, b);
            boxes.push(b);
        }
        for _ in 0..100 {
            let c = Vec3::new(
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-200.0..200.0),
            );
            let probe = cube(c, rng.gen_range(1.0..40.0));
            let hits = grid.query(&probe);
            for (id, b) in boxes.iter().enumerate() {
                if b.intersects(&probe) {
                    assert!(hits.contains(&(id as u32)), "missed entity {id}");
                }
            }
            assert!(hits.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
