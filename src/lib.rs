//! Skinned Mesh Baker - streams animated mesh vertices into GPU textures
//!
//! Every frame each animated source is baked into a static pose, its vertices
//! are uploaded into a flat position/normal buffer at a running offset, and a
//! compute kernel writes three maps a particle or VFX system can sample:
//! - **position**: world-space position, `Rgba32Float`
//! - **velocity**: world-space velocity per second, `Rgba16Float`
//! - **normal**: world-space unit normal, `Rgba16Float`
//!
//! With the default 256-pixel width, vertex `i` lives at pixel `(i % 256, i / 256)`.
//!
//! Velocity comes from one of two sources:
//! - a second, double-buffered position buffer holding last frame's vertices
//! - last frame's position map (*optimal mode*), which skips the second buffer
//!
//! This crate supports two backends:
//! - **wgpu**: headless compute on any adapter wgpu can find
//! - **CPU**: host evaluation of the same kernels, for tests and GPU-less machines

pub mod backend;
pub mod baker;
pub mod pipeline;
pub mod profiling;
pub mod resources;
pub mod scene;

pub use backend::traits::{BackendError, BackendResult, ComputeBackend};
pub use backend::{CpuBackend, WgpuBackend};
pub use baker::{Backend, SkinnedMeshBaker};
pub use resources::{MapLayout, MapTexture};
pub use scene::{BakedMesh, PosedMesh, RootTransform, SkinnedSource, Transform};

use thiserror::Error;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend selection for the baker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu backend - runs the kernels on a GPU adapter
    #[default]
    Wgpu,
    /// Host backend - evaluates the kernels on the CPU
    Cpu,
}

/// Baker error type
#[derive(Error, Debug)]
pub enum BakerError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Source layout changed: expected {expected} vertices, got {actual}")]
    SourceLayoutChanged { expected: usize, actual: usize },
    #[error("Source baked {count} vertices at offset {offset}, only {capacity} reserved")]
    VertexOverflow {
        offset: usize,
        count: usize,
        capacity: usize,
    },
    #[error("Baked mesh has {positions} positions but {normals} normals")]
    NormalCountMismatch { positions: usize, normals: usize },
    #[error("Too many vertices for one map: {0}")]
    TooManyVertices(usize),
    #[error("Missing {0} for the active mode")]
    MissingResource(&'static str),
}

/// Configuration for the baker
#[derive(Debug, Clone)]
pub struct BakerConfig {
    /// Map width in pixels, a multiple of the workgroup size
    pub map_width: u32,
    /// Map height is rounded up to a multiple of this many rows, itself a
    /// multiple of the workgroup size
    pub rows_multiple: u32,
    /// Start in optimal mode
    pub optimal_mode: bool,
    /// Prefix for GPU resource labels and log lines
    pub label: String,
}

impl Default for BakerConfig {
    fn default() -> Self {
        Self {
            map_width: 256,
            rows_multiple: 8,
            optimal_mode: false,
            label: "Skinned Mesh Baker".to_string(),
        }
    }
}

impl BakerConfig {
    /// Both map dimensions must tile into whole workgroups.
    ///
    /// The defaults give the standard layout: 256 pixels wide, height the
    /// smallest multiple of 8 rows that holds every vertex.
    pub fn validate(&self) -> Result<(), BakerError> {
        let ws = pipeline::WORKGROUP_SIZE;
        if self.map_width == 0 || self.map_width % ws != 0 {
            return Err(BakerError::InvalidConfig(format!(
                "map_width {} is not a positive multiple of {}",
                self.map_width, ws
            )));
        }
        if self.rows_multiple == 0 || self.rows_multiple % ws != 0 {
            return Err(BakerError::InvalidConfig(format!(
                "rows_multiple {} is not a positive multiple of {}",
                self.rows_multiple, ws
            )));
        }
        Ok(())
    }
}
