//! Output maps and their raster layout

use crate::backend::traits::*;
use crate::backend::types::*;

/// Raster layout shared by the sampler and the transfer kernels.
///
/// Vertex `i` lives at pixel `(i % width, i / width)`. The height is rounded up
/// to a multiple of `rows_multiple` so the map tiles evenly into workgroups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLayout {
    pub width: u32,
    pub height: u32,
    pub vertex_count: u32,
}

impl MapLayout {
    pub fn for_vertex_count(vertex_count: u32, width: u32, rows_multiple: u32) -> Self {
        let rows = vertex_count.div_ceil(width);
        let height = rows.div_ceil(rows_multiple) * rows_multiple;
        Self {
            width,
            height,
            vertex_count,
        }
    }

    /// Pixel holding vertex `index`
    pub fn texel_of(&self, index: u32) -> (u32, u32) {
        (index % self.width, index / self.width)
    }

    /// Vertex stored at pixel `(x, y)`, `None` for unused pixels
    pub fn index_of(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y * self.width + x;
        (index < self.vertex_count).then_some(index)
    }

    /// Workgroup counts covering the whole map
    pub fn workgroups(&self, workgroup_size: u32) -> (u32, u32) {
        (
            self.width.div_ceil(workgroup_size),
            self.height.div_ceil(workgroup_size),
        )
    }
}

/// A texture together with the view the kernels bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
}

impl MapTexture {
    fn create<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        label: String,
        layout: &MapLayout,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(label),
            width: layout.width,
            height: layout.height,
            format,
            usage,
        })?;
        let view = match backend.create_texture_view(handle) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(handle);
                return Err(e);
            }
        };
        Ok(Self { handle, view })
    }
}

pub const POSITION_MAP_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const VELOCITY_MAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const NORMAL_MAP_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Position, velocity and normal maps, plus the position history the
/// optimal kernel reads last frame's positions from.
#[derive(Debug)]
pub struct OutputMaps {
    pub layout: MapLayout,
    pub position: MapTexture,
    pub velocity: MapTexture,
    pub normal: MapTexture,
    history: Option<MapTexture>,
    label: String,
}

impl OutputMaps {
    /// Allocate all three maps. Either every texture exists afterwards or none.
    pub fn create<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        layout: MapLayout,
        label: &str,
    ) -> BackendResult<Self> {
        let output_usage =
            TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_SRC;

        let position = MapTexture::create(
            backend,
            format!("{label} Position Map"),
            &layout,
            POSITION_MAP_FORMAT,
            output_usage,
        )?;
        let velocity = match MapTexture::create(
            backend,
            format!("{label} Velocity Map"),
            &layout,
            VELOCITY_MAP_FORMAT,
            output_usage,
        ) {
            Ok(t) => t,
            Err(e) => {
                backend.destroy_texture(position.handle);
                return Err(e);
            }
        };
        let normal = match MapTexture::create(
            backend,
            format!("{label} Normal Map"),
            &layout,
            NORMAL_MAP_FORMAT,
            output_usage,
        ) {
            Ok(t) => t,
            Err(e) => {
                backend.destroy_texture(position.handle);
                backend.destroy_texture(velocity.handle);
                return Err(e);
            }
        };

        log::debug!(
            "Created {}x{} output maps for {} vertices",
            layout.width,
            layout.height,
            layout.vertex_count
        );

        Ok(Self {
            layout,
            position,
            velocity,
            normal,
            history: None,
            label: label.to_string(),
        })
    }

    pub fn history(&self) -> Option<&MapTexture> {
        self.history.as_ref()
    }

    /// Allocate or release the position history to match `enabled`.
    pub fn set_history<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        enabled: bool,
    ) -> BackendResult<()> {
        match (enabled, self.history) {
            (true, None) => {
                self.history = Some(MapTexture::create(
                    backend,
                    format!("{} Position History", self.label),
                    &self.layout,
                    POSITION_MAP_FORMAT,
                    TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                )?);
            }
            (false, Some(history)) => {
                backend.destroy_texture(history.handle);
                self.history = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Snapshot the position map into the history so the optimal kernel can
    /// read last frame while writing this one.
    pub fn capture_history<B: ComputeBackend + ?Sized>(&self, backend: &mut B) {
        if let Some(history) = &self.history {
            backend.copy_texture(self.position.handle, history.handle);
        }
    }

    pub fn destroy<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_texture(self.position.handle);
        backend.destroy_texture(self.velocity.handle);
        backend.destroy_texture(self.normal.handle);
        if let Some(history) = self.history {
            backend.destroy_texture(history.handle);
        }
    }
}
