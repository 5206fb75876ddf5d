//! Animated source meshes and the transient mesh they bake into

use crate::scene::Transform;
use glam::{Mat4, Vec3};

/// An animated mesh the baker samples once per frame.
///
/// Skinning itself belongs to the host. The baker only asks a source to
/// evaluate its current pose into a static snapshot.
pub trait SkinnedSource {
    /// Local-to-world matrix of the source's root
    fn world_transform(&self) -> Mat4;

    /// Number of vertices in the shared mesh. Fixed for the source's lifetime.
    fn vertex_count(&self) -> usize;

    /// One-shot skin evaluation of the current pose into `mesh`.
    ///
    /// Implementations replace the mesh contents, normally via
    /// [`BakedMesh::set_from_slices`] or [`BakedMesh::write`].
    fn bake_into(&self, mesh: &mut BakedMesh);
}

/// Transient static mesh that sources bake into.
///
/// Owned by the sampler and reused across sources and frames so the hot path
/// does not allocate once capacities have grown.
#[derive(Debug, Default, Clone)]
pub struct BakedMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl BakedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertices: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            normals: Vec::with_capacity(vertices),
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
    }

    /// Replace contents with copies of the given arrays.
    pub fn set_from_slices(&mut self, positions: &[Vec3], normals: &[Vec3]) {
        self.clear();
        self.positions.extend_from_slice(positions);
        self.normals.extend_from_slice(normals);
    }

    /// Resize to `vertices` and hand out both arrays for in-place writing.
    pub fn write(&mut self, vertices: usize) -> (&mut [Vec3], &mut [Vec3]) {
        self.positions.clear();
        self.positions.resize(vertices, Vec3::ZERO);
        self.normals.clear();
        self.normals.resize(vertices, Vec3::ZERO);
        (&mut self.positions, &mut self.normals)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }
}

/// Source whose pose is pushed by the host.
///
/// Useful when skinning already happened elsewhere (a GPU skinning pass read
/// back, an offline cache) and only the baking is wanted.
#[derive(Debug, Clone)]
pub struct PosedMesh {
    pub transform: Transform,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl PosedMesh {
    /// Normals default to zero when `normals` is shorter than `positions`.
    pub fn new(positions: Vec<Vec3>, mut normals: Vec<Vec3>) -> Self {
        normals.resize(positions.len(), Vec3::ZERO);
        Self {
            transform: Transform::default(),
            positions,
            normals,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Update the pose. The vertex count must not change.
    pub fn pose_mut(&mut self) -> (&mut [Vec3], &mut [Vec3]) {
        (&mut self.positions, &mut self.normals)
    }
}

impl SkinnedSource for PosedMesh {
    fn world_transform(&self) -> Mat4 {
        self.transform.matrix()
    }

    fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn bake_into(&self, mesh: &mut BakedMesh) {
        mesh.set_from_slices(&self.positions, &self.normals);
    }
}
