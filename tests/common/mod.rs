//! Common utilities for baking integration tests.
//!
//! Provides a backend-agnostic test context and procedural animated sources.

#![allow(dead_code)]

use glam::Vec3;
use skinned_mesh_baker::backend::{BufferHandle, TexelData};
use skinned_mesh_baker::{
    Backend, BackendType, BakedMesh, BakerConfig, ComputeBackend, MapTexture, SkinnedMeshBaker,
    SkinnedSource, Transform,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the integration tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Host evaluation, always available.
    Cpu,
    /// wgpu on whatever adapter is present.
    Wgpu,
}

impl BackendKind {
    pub fn backend_type(self) -> BackendType {
        match self {
            BackendKind::Cpu => BackendType::Cpu,
            BackendKind::Wgpu => BackendType::Wgpu,
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A backend plus a baker created with the given config.
pub struct TestContext {
    pub kind: BackendKind,
    pub backend: Backend,
    pub baker: SkinnedMeshBaker,
}

impl TestContext {
    /// Returns `None` if the backend cannot be created on this machine.
    pub fn new(kind: BackendKind, config: BakerConfig) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let backend = Backend::new(kind.backend_type()).ok()?;
        let baker = SkinnedMeshBaker::new(config).expect("valid config");
        Some(Self {
            kind,
            backend,
            baker,
        })
    }

    pub fn with_mode(kind: BackendKind, optimal_mode: bool) -> Option<Self> {
        Self::new(
            kind,
            BakerConfig {
                optimal_mode,
                ..Default::default()
            },
        )
    }

    pub fn initialize(&mut self, sources: &[&dyn SkinnedSource]) {
        self.baker
            .initialize(self.backend.as_dyn_mut(), sources)
            .expect("initialize");
    }

    pub fn step(&mut self, sources: &[&dyn SkinnedSource], dt: f32) {
        self.baker
            .step(self.backend.as_dyn_mut(), sources, dt)
            .expect("step");
    }

    pub fn set_optimal_mode(&mut self, enabled: bool) {
        self.baker
            .set_optimal_mode(self.backend.as_dyn_mut(), enabled)
            .expect("set_optimal_mode");
    }

    pub fn teardown(&mut self) {
        self.baker.teardown(self.backend.as_dyn_mut());
    }

    pub fn read_map(&mut self, map: Option<MapTexture>) -> TexelData {
        let map = map.expect("baker is initialized");
        self.backend
            .as_dyn_mut()
            .read_texture(map.handle)
            .expect("texture readback")
    }

    pub fn position_map(&mut self) -> TexelData {
        let map = self.baker.position_map();
        self.read_map(map)
    }

    pub fn velocity_map(&mut self) -> TexelData {
        let map = self.baker.velocity_map();
        self.read_map(map)
    }

    pub fn normal_map(&mut self) -> TexelData {
        let map = self.baker.normal_map();
        self.read_map(map)
    }

    /// Vertex `i` of a map, using the baker's raster layout.
    pub fn vertex(&self, data: &TexelData, index: u32) -> Vec3 {
        let layout = self.baker.map_layout().expect("baker is initialized");
        let (x, y) = layout.texel_of(index);
        let t = data.texel(x, y);
        Vec3::new(t[0], t[1], t[2])
    }

    /// Flat `xyz` floats of the previous-position buffer.
    pub fn previous_positions(&mut self) -> Vec<f32> {
        let buffer = self
            .baker
            .previous_position_buffer()
            .expect("non-optimal mode");
        read_floats(self.backend.as_dyn_mut(), buffer)
    }
}

// ============================================================================
// Procedural Sources
// ============================================================================

/// A row of vertices drifting at constant local velocity.
///
/// Vertex `i` starts at `(i, 0, 0) + origin` and moves by `drift` per second.
pub struct DriftingRow {
    pub transform: Transform,
    pub origin: Vec3,
    pub drift: Vec3,
    pub count: usize,
    pub time: f32,
}

impl DriftingRow {
    pub fn new(count: usize) -> Self {
        Self {
            transform: Transform::default(),
            origin: Vec3::ZERO,
            drift: Vec3::ZERO,
            count,
            time: 0.0,
        }
    }

    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_drift(mut self, drift: Vec3) -> Self {
        self.drift = drift;
        self
    }

    pub fn advance(&mut self, dt: f32) {
        self.time += dt;
    }

    /// Local-space position of vertex `i` at the current time.
    pub fn local_position(&self, i: usize) -> Vec3 {
        self.origin + Vec3::new(i as f32, 0.0, 0.0) + self.drift * self.time
    }
}

impl SkinnedSource for DriftingRow {
    fn world_transform(&self) -> glam::Mat4 {
        self.transform.matrix()
    }

    fn vertex_count(&self) -> usize {
        self.count
    }

    fn bake_into(&self, mesh: &mut BakedMesh) {
        let (positions, normals) = mesh.write(self.count);
        for (i, (p, n)) in positions.iter_mut().zip(normals.iter_mut()).enumerate() {
            *p = self.local_position(i);
            *n = Vec3::new(0.0, 2.0, 0.0);
        }
    }
}

/// Assert two vectors match within `eps` per component.
pub fn assert_vec3_near(actual: Vec3, expected: Vec3, eps: f32) {
    assert!(
        (actual - expected).abs().max_element() <= eps,
        "expected {expected:?}, got {actual:?}"
    );
}

/// Blocking readback of a buffer as `f32`s.
pub fn read_floats(backend: &mut dyn ComputeBackend, buffer: BufferHandle) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(&backend.read_buffer(buffer).expect("buffer readback"))
}
