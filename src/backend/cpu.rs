//! Host reference backend.
//!
//! Keeps every resource in system memory and executes the built-in transfer
//! kernels on the CPU when they are dispatched. Used for tests and on machines
//! without a usable GPU adapter. Half-precision textures are quantised through
//! `half::f16` on store so results match what the GPU maps would hold.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::kernel::{self, bindings, TransferKernel, TransferUniform, VelocitySource};
use half::f16;
use std::collections::HashMap;

struct CpuBuffer {
    data: Vec<u8>,
}

struct CpuTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    texels: Vec<[f32; 4]>,
}

impl CpuTexture {
    fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let value = if self.format.is_half() {
            value.map(|c| f16::from_f32(c).to_f32())
        } else {
            value
        };
        let index = (y * self.width + x) as usize;
        self.texels[index] = value;
    }
}

/// Pending compute pass state
struct PendingComputePass {
    label: Option<String>,
    pipeline: Option<ComputePipelineHandle>,
    bind_group: Option<BindGroupHandle>,
}

/// CPU backend implementation
pub struct CpuBackend {
    buffers: HashMap<u64, CpuBuffer>,
    textures: HashMap<u64, CpuTexture>,
    // view id -> texture id
    texture_views: HashMap<u64, u64>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    compute_pipelines: HashMap<u64, TransferKernel>,

    next_id: u64,
    pending_compute_pass: Option<PendingComputePass>,
    in_frame: bool,
    dispatch_count: u64,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            compute_pipelines: HashMap::new(),
            next_id: 1,
            pending_compute_pass: None,
            in_frame: false,
            dispatch_count: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Number of buffers currently alive
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Bind groups, layouts and pipelines still alive
    pub fn live_bindings(&self) -> usize {
        self.bind_groups.len() + self.bind_group_layouts.len() + self.compute_pipelines.len()
    }

    /// Number of textures currently alive
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Total dispatches executed since creation
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Whether a frame is open
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    fn buffer_floats(&self, entries: &[(u32, BindGroupEntry)], binding: u32) -> BackendResult<Vec<f32>> {
        let bytes = self.buffer_bytes(entries, binding)?;
        Ok(bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
    }

    fn buffer_bytes<'a>(
        &'a self,
        entries: &[(u32, BindGroupEntry)],
        binding: u32,
    ) -> BackendResult<&'a [u8]> {
        match find_entry(entries, binding)? {
            BindGroupEntry::Buffer { buffer, offset, size } => {
                let data = &self
                    .buffers
                    .get(&buffer.0)
                    .ok_or(BackendError::UnknownHandle { kind: "buffer", id: buffer.0 })?
                    .data;
                let start = (*offset as usize).min(data.len());
                let end = size.map_or(data.len(), |s| (start + s as usize).min(data.len()));
                Ok(&data[start..end])
            }
            _ => Err(BackendError::PipelineCreationFailed(format!(
                "binding {binding} is not a buffer"
            ))),
        }
    }

    fn view_texture_id(&self, entries: &[(u32, BindGroupEntry)], binding: u32) -> BackendResult<u64> {
        let view = match find_entry(entries, binding)? {
            BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => *view,
            _ => {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "binding {binding} is not a texture"
                )))
            }
        };
        self.texture_views
            .get(&view.0)
            .copied()
            .ok_or(BackendError::UnknownHandle { kind: "texture view", id: view.0 })
    }

    fn run_transfer(
        &mut self,
        kernel: TransferKernel,
        bind_group: BindGroupHandle,
        groups_x: u32,
        groups_y: u32,
    ) -> BackendResult<()> {
        let entries = self
            .bind_groups
            .get(&bind_group.0)
            .ok_or(BackendError::UnknownHandle { kind: "bind group", id: bind_group.0 })?
            .clone();

        let params: TransferUniform = {
            let bytes = self.buffer_bytes(&entries, bindings::PARAMS)?;
            let size = std::mem::size_of::<TransferUniform>();
            if bytes.len() < size {
                return Err(BackendError::ReadbackFailed("uniform buffer too small".into()));
            }
            bytemuck::pod_read_unaligned(&bytes[..size])
        };
        let positions = self.buffer_floats(&entries, bindings::POSITION_BUFFER)?;
        let normals = self.buffer_floats(&entries, bindings::NORMAL_BUFFER)?;

        let needed = params.vertex_count as usize * 3;
        if positions.len() < needed || normals.len() < needed {
            return Err(BackendError::ReadbackFailed(format!(
                "vertex buffers hold {} floats, kernel needs {}",
                positions.len().min(normals.len()),
                needed
            )));
        }

        let previous_buffer;
        let previous_texels;
        let previous = match kernel {
            TransferKernel::NonOptimal => {
                previous_buffer = self.buffer_floats(&entries, bindings::PREVIOUS_POSITIONS)?;
                if previous_buffer.len() < needed {
                    return Err(BackendError::ReadbackFailed(
                        "previous position buffer too small".into(),
                    ));
                }
                VelocitySource::PreviousBuffer(&previous_buffer)
            }
            TransferKernel::Optimal => {
                let id = self.view_texture_id(&entries, bindings::PREVIOUS_POSITIONS)?;
                let texture = self
                    .textures
                    .get(&id)
                    .ok_or(BackendError::UnknownHandle { kind: "texture", id })?;
                previous_texels = texture.texels.clone();
                VelocitySource::PreviousMap {
                    texels: &previous_texels,
                    width: texture.width,
                }
            }
        };

        let position_map = self.view_texture_id(&entries, bindings::POSITION_MAP)?;
        let velocity_map = self.view_texture_id(&entries, bindings::VELOCITY_MAP)?;
        let normal_map = self.view_texture_id(&entries, bindings::NORMAL_MAP)?;
        let (width, height) = self
            .textures
            .get(&position_map)
            .map(|t| (t.width, t.height))
            .ok_or(BackendError::UnknownHandle { kind: "texture", id: position_map })?;

        let mut outputs = Vec::new();
        let max_x = (groups_x * kernel::WORKGROUP_SIZE).min(width);
        let max_y = (groups_y * kernel::WORKGROUP_SIZE).min(height);
        for y in 0..max_y {
            for x in 0..max_x {
                if let Some(out) =
                    kernel::evaluate_texel(&params, &positions, &normals, &previous, x, y)
                {
                    outputs.push((x, y, out));
                }
            }
        }

        for (target, pick) in [
            (position_map, 0usize),
            (velocity_map, 1),
            (normal_map, 2),
        ] {
            let texture = self
                .textures
                .get_mut(&target)
                .ok_or(BackendError::UnknownHandle { kind: "texture", id: target })?;
            for (x, y, out) in &outputs {
                let value = match pick {
                    0 => out.position,
                    1 => out.velocity,
                    _ => out.normal,
                };
                texture.store(*x, *y, value.to_array());
            }
        }

        log::trace!(
            "CpuBackend: {} wrote {} texels",
            kernel.entry_point(),
            outputs.len()
        );
        Ok(())
    }
}

fn find_entry(entries: &[(u32, BindGroupEntry)], binding: u32) -> BackendResult<&BindGroupEntry> {
    entries
        .iter()
        .find(|(b, _)| *b == binding)
        .map(|(_, e)| e)
        .ok_or_else(|| BackendError::PipelineCreationFailed(format!("binding {binding} missing")))
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU Reference"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("CpuBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            CpuBuffer {
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(buf) = self.buffers.get_mut(&buffer.0) else {
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            log::error!(
                "CpuBackend: write of {} bytes at {} overflows buffer of {}",
                data.len(),
                offset,
                buf.data.len()
            );
            return;
        }
        buf.data[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "CpuBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let id = self.allocate_id();
        self.textures.insert(
            id,
            CpuTexture {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                texels: vec![[0.0; 4]; (desc.width * desc.height) as usize],
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let id = self.allocate_id();
        self.texture_views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.bind_group_layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;
        if let Some(missing) = layout_entries
            .iter()
            .find(|l| !entries.iter().any(|(b, _)| *b == l.binding))
        {
            return Err(BackendError::PipelineCreationFailed(format!(
                "binding {} has no resource",
                missing.binding
            )));
        }

        let id = self.allocate_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let kernel = TransferKernel::from_entry_point(&desc.entry_point).ok_or_else(|| {
            BackendError::PipelineCreationFailed(format!(
                "entry point {} has no host implementation",
                desc.entry_point
            ))
        })?;
        let id = self.allocate_id();
        self.compute_pipelines.insert(id, kernel);
        Ok(ComputePipelineHandle(id))
    }

    fn begin_frame(&mut self) {
        self.in_frame = true;
    }

    fn end_frame(&mut self) {
        self.in_frame = false;
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            pipeline: None,
            bind_group: None,
        });
    }

    fn end_compute_pass(&mut self) {
        if let Some(pass) = self.pending_compute_pass.take() {
            log::trace!("CpuBackend: finished compute pass {:?}", pass.label);
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.pipeline = Some(pipeline);
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if index != 0 {
            log::warn!("CpuBackend: only bind group 0 is used, ignoring index {}", index);
            return;
        }
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.bind_group = Some(bind_group);
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, _z: u32) {
        if !self.in_frame {
            log::warn!("CpuBackend: dispatch outside of a frame");
        }
        let Some((pipeline, bind_group)) = self
            .pending_compute_pass
            .as_ref()
            .and_then(|p| Some((p.pipeline?, p.bind_group?)))
        else {
            log::error!("CpuBackend: dispatch without pipeline and bind group");
            return;
        };
        let Some(&kernel) = self.compute_pipelines.get(&pipeline.0) else {
            log::error!("CpuBackend: unknown pipeline {:?}", pipeline);
            return;
        };

        match self.run_transfer(kernel, bind_group, x, y) {
            Ok(()) => self.dispatch_count += 1,
            Err(e) => log::error!("CpuBackend: {} failed: {}", kernel.entry_point(), e),
        }
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        let Some(texels) = self.textures.get(&src.0).map(|t| t.texels.clone()) else {
            return;
        };
        if let Some(target) = self.textures.get_mut(&dst.0) {
            if target.texels.len() == texels.len() {
                target.texels = texels;
            } else {
                log::error!("CpuBackend: texture copy between mismatched sizes");
            }
        }
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.buffers
            .get(&buffer.0)
            .map(|b| b.data.clone())
            .ok_or(BackendError::UnknownHandle { kind: "buffer", id: buffer.0 })
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TexelData> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", id: texture.0 })?;
        Ok(TexelData {
            width: tex.width,
            height: tex.height,
            texels: tex.texels.clone(),
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.texture_views.retain(|_, tex| *tex != texture.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
    }
}
