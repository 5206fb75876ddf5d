//! Mesh sampler
//!
//! Bakes each source's current pose and uploads the vertex data into the
//! shared position and normal buffers at a running vertex offset.

use crate::backend::traits::*;
use crate::resources::PositionBufferPair;
use crate::scene::{BakedMesh, SkinnedSource};
use crate::BakerError;

/// Bytes per vertex in the flat `xyz` buffers.
pub const VERTEX_STRIDE: u64 = 12;

/// Samples animated sources into the current position buffer.
#[derive(Debug, Default)]
pub struct MeshSampler {
    mesh: BakedMesh,
}

impl MeshSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the transient mesh for the largest expected source.
    pub fn with_capacity(vertices: usize) -> Self {
        Self {
            mesh: BakedMesh::with_capacity(vertices),
        }
    }

    /// Bake `source` and write its vertices starting at vertex `offset`.
    ///
    /// Returns the number of vertices written so the caller can advance the
    /// offset. A source that bakes to zero vertices writes nothing.
    pub fn bake<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        source: &dyn SkinnedSource,
        offset: usize,
        buffers: &PositionBufferPair,
    ) -> Result<usize, BakerError> {
        source.bake_into(&mut self.mesh);

        let count = self.mesh.vertex_count();
        if count == 0 {
            return Ok(0);
        }
        if self.mesh.normals().len() != count {
            return Err(BakerError::NormalCountMismatch {
                positions: count,
                normals: self.mesh.normals().len(),
            });
        }
        let capacity = buffers.vertex_count();
        if offset + count > capacity {
            return Err(BakerError::VertexOverflow {
                offset,
                count,
                capacity,
            });
        }

        let byte_offset = offset as u64 * VERTEX_STRIDE;
        backend.write_buffer(
            buffers.current(),
            byte_offset,
            bytemuck::cast_slice(self.mesh.positions()),
        );
        backend.write_buffer(
            buffers.normals(),
            byte_offset,
            bytemuck::cast_slice(self.mesh.normals()),
        );

        log::trace!("Sampled {} vertices at offset {}", count, offset);
        Ok(count)
    }

    /// Drop the transient mesh and its storage.
    pub fn release(&mut self) {
        self.mesh = BakedMesh::new();
    }
}
