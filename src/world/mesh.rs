//! Mesh registry: geometry looked up by string handle

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collider::{Aabb, TriMesh};
use crate::math::{Mat4, Vec3};

/// Handle of the built-in humanoid proxy mesh used for player avatars.
pub const AVATAR_MESH: &str = "alpha3";
pub const CUBE_MESH: &str = "cube";
pub const GROUND_MESH: &str = "ground";

/// Raw triangle geometry as produced by an external loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn from_trimesh(mesh: &TriMesh) -> Self {
        let positions: Vec<Vec3> = mesh.triangles.iter().flat_map(|t| t.points).collect();
        let indices = (0..positions.len() as u32).collect();
        Self { positions, indices }
    }

    /// Collapse bitwise-identical positions and remap the indices.
    pub fn deduplicated(&self) -> MeshData {
        let mut unique: Vec<Vec3> = Vec::new();
        let mut lookup: HashMap<[u64; 3], u32> = HashMap::new();
        let mut remap = Vec::with_capacity(self.positions.len());
        for p in &self.positions {
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            let index = *lookup.entry(key).or_insert_with(|| {
                unique.push(*p);
                (unique.len() - 1) as u32
            });
            remap.push(index);
        }
        let indices = self
            .indices
            .iter()
            .map(|&i| remap.get(i as usize).copied().unwrap_or(u32::MAX))
            .collect();
        MeshData {
            positions: unique,
            indices,
        }
    }

    /// Triangle mesh built from the unique vertices, with `transform` applied.
    pub fn trimesh(&self, transform: &Mat4) -> TriMesh {
        let unique = self.deduplicated();
        TriMesh::from_indexed(&unique.positions, &unique.indices).transform(transform)
    }

    pub fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().copied())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("failed to read mesh file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse mesh file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Lookup from handle to geometry.
#[derive(Debug, Clone, Default)]
pub struct MeshRegistry {
    meshes: HashMap<String, MeshData>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the meshes a headless server needs.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            AVATAR_MESH,
            MeshData::from_trimesh(
                &Aabb::new(Vec3::new(-40.0, 0.0, -20.0), Vec3::new(40.0, 160.0, 20.0)).to_trimesh(),
            ),
        );
        registry.register(
            CUBE_MESH,
            MeshData::from_trimesh(&Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)).to_trimesh()),
        );
        registry.register(
            GROUND_MESH,
            MeshData {
                positions: vec![
                    Vec3::new(-5000.0, 0.0, -5000.0),
                    Vec3::new(5000.0, 0.0, -5000.0),
                    Vec3::new(5000.0, 0.0, 5000.0),
                    Vec3::new(-5000.0, 0.0, 5000.0),
                ],
                indices: vec![0, 3, 2, 0, 2, 1],
            },
        );
        registry
    }

    pub fn register(&mut self, handle: impl Into<String>, mesh: MeshData) {
        self.meshes.insert(handle.into(), mesh);
    }

    pub fn get(&self, handle: &str) -> Option<&MeshData> {
        self.meshes.get(handle)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.meshes.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Merge meshes from a JSON file of the form `{ "handle": { positions, indices } }`.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, MeshError> {
        let text = std::fs::read_to_string(path)?;
        let meshes: HashMap<String, MeshData> = serde_json::from_str(&text)?;
        let count = meshes.len();
        self.meshes.extend(meshes);
        info!(path = %path.display(), count, "Loaded mesh file");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ground_faces_up() {
        let registry = MeshRegistry::with_builtins();
        let ground = registry.get(GROUND_MESH).unwrap().trimesh(&Mat4::IDENTITY);
        assert_eq!(ground.triangles.len(), 2);
        assert!(ground.triangles.iter().all(|t| t.normal.y > 0.99));
    }

    #[test]
    fn deduplication_keeps_triangles() {
        let registry = MeshRegistry::with_builtins();
        let cube = registry.get(CUBE_MESH).unwrap();
        let unique = cube.deduplicated();
        assert_eq!(unique.positions.len(), 8);
        assert_eq!(cube.trimesh(&Mat4::IDENTITY).triangles.len(), 12);
    }

    #[test]
    fn mesh_file_round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!("simcore-mesh-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("meshes.json");
        let mut source = HashMap::new();
        source.insert(
            "ramp".to_string(),
            MeshData {
                positions: vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0), Vec3::new(10.0, 5.0, 0.0)],
                indices: vec![0, 1, 2],
            },
        );
        std::fs::write(&path, serde_json::to_string(&source).unwrap()).unwrap();

        let mut registry = MeshRegistry::new();
        assert_eq!(registry.load_file(&path).unwrap(), 1);
        assert!(registry.contains("ramp"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
