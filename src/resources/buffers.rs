//! Double-buffered vertex storage
//!
//! The sampler always writes into the *current* position buffer. In
//! non-optimal mode a second buffer keeps last frame's positions and the two
//! trade places once the transfer has consumed them. In optimal mode only the
//! current buffer exists and last frame's positions come from the position map.

use crate::backend::traits::*;
use crate::backend::types::*;

/// Current/previous position buffers plus the normal buffer.
///
/// Invariant: `previous` is `Some` exactly when optimal mode is off.
#[derive(Debug)]
pub struct PositionBufferPair {
    current: BufferHandle,
    previous: Option<BufferHandle>,
    normals: BufferHandle,
    vertex_count: usize,
    optimal: bool,
    history_ready: bool,
    label: String,
}

impl PositionBufferPair {
    pub fn create<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        vertex_count: usize,
        optimal: bool,
        label: &str,
    ) -> BackendResult<Self> {
        let current = backend.create_buffer(&BufferDescriptor::vec3_storage(
            format!("{label} Position Buffer"),
            vertex_count,
        ))?;
        let normals = match backend.create_buffer(&BufferDescriptor::vec3_storage(
            format!("{label} Normal Buffer"),
            vertex_count,
        )) {
            Ok(b) => b,
            Err(e) => {
                backend.destroy_buffer(current);
                return Err(e);
            }
        };

        let mut pair = Self {
            current,
            previous: None,
            normals,
            vertex_count,
            optimal,
            history_ready: false,
            label: label.to_string(),
        };
        if !optimal {
            match pair.allocate_previous(backend) {
                Ok(previous) => pair.previous = Some(previous),
                Err(e) => {
                    pair.destroy(backend);
                    return Err(e);
                }
            }
        }
        Ok(pair)
    }

    fn allocate_previous<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
    ) -> BackendResult<BufferHandle> {
        backend.create_buffer(&BufferDescriptor::vec3_storage(
            format!("{} Previous Position Buffer", self.label),
            self.vertex_count,
        ))
    }

    /// Switch operating mode.
    ///
    /// Releases the previous-position buffer whenever the mode changes and
    /// allocates a fresh one when switching to non-optimal mode. Returns
    /// whether anything changed; setting the current mode again is a no-op.
    pub fn set_mode<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        optimal: bool,
    ) -> BackendResult<bool> {
        if optimal == self.optimal {
            return Ok(false);
        }

        if let Some(previous) = self.previous.take() {
            backend.destroy_buffer(previous);
        }
        if !optimal {
            self.previous = Some(self.allocate_previous(backend)?);
            // The new buffer holds zeros, not last frame's positions.
            self.history_ready = false;
        }
        self.optimal = optimal;

        log::debug!(
            "{}: optimal mode {}",
            self.label,
            if optimal { "on" } else { "off" }
        );
        Ok(true)
    }

    /// Hand the buffer just written over to the previous role.
    ///
    /// Called once per frame after the transfer. Ownership moves, nothing is
    /// copied. In optimal mode there is nothing to exchange.
    pub fn rotate(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            std::mem::swap(&mut self.current, previous);
            log::trace!("{}: swapped position buffers", self.label);
        }
        self.history_ready = true;
    }

    /// Buffer the sampler writes this frame's positions into
    pub fn current(&self) -> BufferHandle {
        self.current
    }

    /// Last frame's positions, only in non-optimal mode
    pub fn previous(&self) -> Option<BufferHandle> {
        self.previous
    }

    pub fn normals(&self) -> BufferHandle {
        self.normals
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn is_optimal(&self) -> bool {
        self.optimal
    }

    /// Whether last frame's positions are available to difference against.
    ///
    /// False before the first frame and right after a freshly allocated
    /// previous buffer.
    pub fn history_ready(&self) -> bool {
        self.history_ready
    }

    pub fn destroy<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_buffer(self.current);
        backend.destroy_buffer(self.normals);
        if let Some(previous) = self.previous {
            backend.destroy_buffer(previous);
        }
    }
}
