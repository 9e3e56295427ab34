//! Offline navigation mesh construction
//!
//! The build runs in five stages: rasterize triangles into a voxel
//! heightfield, pack walkable spans into a compact heightfield, compute a
//! distance-to-edge field, partition into watershed regions and trace region
//! contours.

pub mod compact;
pub mod contour;
pub mod distance;
pub mod heightfield;
pub mod region;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collider::{Aabb, Collider, TriMesh, Triangle};
use crate::math::Vec3;
use crate::world::World;

pub use compact::{CompactHeightField, CompactSpan};
pub use contour::Contour;
pub use heightfield::{HeightField, Span};

/// Build parameters. Heights and distances are world units unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshSettings {
    pub cell_size: f64,
    pub cell_height: f64,
    /// Minimum headroom for a span to stay walkable.
    pub walkable_height: f64,
    /// Largest floor step between neighbouring spans.
    pub climbable_height: f64,
    /// Expansion rounds per watershed level.
    pub iteration_count: usize,
    /// Regions with fewer spans are merged or discarded.
    pub min_region_area: usize,
    /// Contour simplification tolerance, in cells.
    pub max_error: f64,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 20.0,
            cell_height: 10.0,
            walkable_height: 160.0,
            climbable_height: 30.0,
            iteration_count: 8,
            min_region_area: 8,
            max_error: 1.3,
        }
    }
}

impl NavMeshSettings {
    pub fn walkable_height_cells(&self) -> i32 {
        (self.walkable_height / self.cell_height).ceil() as i32
    }

    pub fn climbable_cells(&self) -> i32 {
        (self.climbable_height / self.cell_height).floor() as i32
    }
}

/// Line segment for debug drawing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebugLine {
    pub from: Vec3,
    pub to: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationMesh {
    pub height_field: HeightField,
    pub compact_height_field: CompactHeightField,
    pub distances: Vec<u16>,
    pub blurred_distances: Vec<u16>,
    pub region_count: usize,
    pub contours: Vec<Contour>,
    pub debug_lines: Vec<DebugLine>,
}

impl NavigationMesh {
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }
}

/// Build a navigation mesh over `bounds` from the given meshes.
pub fn build_navmesh(bounds: &Aabb, meshes: &[TriMesh], settings: &NavMeshSettings) -> NavigationMesh {
    let triangles = meshes.iter().flat_map(|m| m.triangles.iter());
    let height_field = heightfield::build_height_field(bounds, triangles, settings);

    let mut chf = CompactHeightField::build(
        &height_field,
        settings.walkable_height_cells(),
        settings.climbable_cells(),
    );
    let distances = distance::distance_field(&chf);
    let blurred_distances = distance::box_blur(&chf, &distances);
    let region_count = region::build_regions(
        &mut chf,
        &blurred_distances,
        settings.iteration_count,
        settings.min_region_area,
    );
    let contours = contour::build_contours(&chf, settings.max_error);

    let debug_lines = contours
        .iter()
        .flat_map(|c| {
            c.vertices.iter().enumerate().map(move |(i, &from)| DebugLine {
                from,
                to: c.vertices[(i + 1) % c.vertices.len()],
            })
        })
        .collect();

    info!(
        spans = height_field.span_count(),
        walkable = chf.span_count(),
        regions = region_count,
        contours = contours.len(),
        "Built navigation mesh"
    );

    NavigationMesh {
        height_field,
        compact_height_field: chf,
        distances,
        blurred_distances,
        region_count,
        contours,
        debug_lines,
    }
}

/// Static mesh geometry overlapping `bounds`, gathered from the world's
/// broad phase. Bounding-box-only colliders contribute their faces.
pub fn collect_geometry(world: &mut World, bounds: &Aabb) -> Vec<TriMesh> {
    let mut meshes = Vec::new();
    for id in world.query(bounds) {
        let Some(proxy) = world.collider_proxy(id) else {
            continue;
        };
        match &proxy.collider {
            Collider::TriMesh(mesh) => meshes.push(clip_to_bounds(mesh, bounds)),
            Collider::Aabb(bbox) => meshes.push(bbox.to_trimesh()),
            Collider::Capsule(_) => {}
        }
    }
    meshes
}

fn clip_to_bounds(mesh: &TriMesh, bounds: &Aabb) -> TriMesh {
    TriMesh {
        triangles: mesh
            .triangles
            .iter()
            .filter(|t| t.bounding_box().intersects(bounds))
            .copied()
            .collect::<Vec<Triangle>>(),
    }
}

/// Build over the world's static geometry within `bounds`.
pub fn bake_world(world: &mut World, bounds: &Aabb, settings: &NavMeshSettings) -> NavigationMesh {
    let meshes = collect_geometry(world, bounds);
    build_navmesh(bounds, &meshes, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Entity, MeshComponent};

    fn fine_settings() -> NavMeshSettings {
        NavMeshSettings {
            cell_size: 0.1,
            cell_height: 0.1,
            walkable_height: 0.5,
            climbable_height: 0.2,
            iteration_count: 8,
            min_region_area: 4,
            max_error: 1.3,
        }
    }

    #[test]
    fn single_walkable_triangle_produces_contour() {
        let triangle = Triangle::new(
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        );
        let mesh = TriMesh { triangles: vec![triangle] };
        let bounds = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let navmesh = build_navmesh(&bounds, &[mesh], &fine_settings());

        assert!(!navmesh.height_field.is_empty());
        assert!(navmesh.height_field.walkable_span_count() > 0);
        assert!(navmesh.region_count >= 1);
        assert!(!navmesh.contours.is_empty());
        assert_eq!(navmesh.blurred_distances.len(), navmesh.compact_height_field.span_count());
        assert!(!navmesh.debug_lines.is_empty());
    }

    #[test]
    fn no_triangles_means_no_contours() {
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let navmesh = build_navmesh(&bounds, &[], &fine_settings());
        assert!(navmesh.height_field.is_empty());
        assert!(navmesh.contours.is_empty());
        assert_eq!(navmesh.region_count, 0);
    }

    #[test]
    fn degenerate_triangles_are_skipped() {
        let sliver = Triangle::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(3.0));
        let navmesh = build_navmesh(&bounds, &[TriMesh { triangles: vec![sliver] }], &fine_settings());
        assert!(navmesh.height_field.is_empty());
    }

    #[test]
    fn world_ground_is_fully_covered() {
        let mut world = World::default();
        world
            .spawn(Entity::new("ground").with_mesh(MeshComponent::new("ground")).as_static())
            .unwrap();
        let bounds = Aabb::new(Vec3::new(-400.0, -50.0, -400.0), Vec3::new(400.0, 200.0, 400.0));
        let navmesh = bake_world(&mut world, &bounds, &NavMeshSettings::default());
        assert!(navmesh.region_count >= 1);
        assert!(!navmesh.contours.is_empty());
        let chf = &navmesh.compact_height_field;
        assert_eq!(chf.span_count(), chf.width * chf.depth);
        assert!(chf.spans.iter().all(|s| s.region != region::NO_REGION));
    }
}
