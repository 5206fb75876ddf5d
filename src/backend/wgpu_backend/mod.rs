//! wgpu backend implementation
//!
//! Headless: the baker never presents, so no surface is created. Compute
//! commands are buffered per pass and encoded when the pass ends, the same
//! way render passes are handled by windowed backends.

use crate::backend::traits::*;
use crate::backend::types::*;
use half::f16;
use std::collections::HashMap;
use std::sync::mpsc;

/// Buffered compute pass command
#[derive(Clone)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Pending compute pass with buffered commands
struct PendingComputePass {
    label: Option<String>,
    commands: Vec<ComputeCommand>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    // view id -> (texture id, view)
    texture_views: HashMap<u64, (u64, wgpu::TextureView)>,
    bind_group_layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_compute_pipeline_id: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending pass - commands are buffered here and executed on end_compute_pass
    pending_compute_pass: Option<PendingComputePass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> Option<TextureFormat> {
        match format {
            wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
            wgpu::TextureFormat::Rgba32Float => Some(TextureFormat::Rgba32Float),
            _ => None,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        result
    }

    /// Create a headless backend, blocking on adapter and device requests.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Async initialization, for hosts that already run an executor
    pub async fn new_async() -> BackendResult<Self> {
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
        } else {
            wgpu::Backends::all()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;

        // Software adapters still run the compute kernels, just slowly
        let adapter = match adapter {
            Some(adapter) => adapter,
            None => {
                log::warn!("No hardware adapter available, falling back to software adapter");
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        compatible_surface: None,
                        force_fallback_adapter: true,
                    })
                    .await
                    .ok_or_else(|| {
                        BackendError::InitializationFailed("No suitable adapter found".into())
                    })?
            }
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Skinned Mesh Baker Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            compute_pipelines: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_layout_id: 1,
            next_bind_group_id: 1,
            next_compute_pipeline_id: 1,
            encoder: None,
            pending_compute_pass: None,
        })
    }

    /// Get reference to the wgpu device, for hosts sharing it with a renderer
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adapter description, for logging
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Raw texture view, for consumers binding the output maps themselves
    pub fn texture_view(&self, view: TextureViewHandle) -> Option<&wgpu::TextureView> {
        self.texture_views.get(&view.0).map(|(_, v)| v)
    }

    fn encoder_mut(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Bake Encoder"),
            })
        })
    }

    /// Submit anything recorded so far so readbacks observe it.
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    /// Run an allocation inside out-of-memory and validation error scopes.
    fn scoped<T>(
        &self,
        allocate: impl FnOnce(&wgpu::Device) -> T,
        failed: impl FnOnce(String) -> BackendError,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resource = allocate(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        if out_of_memory.is_some() {
            return Err(BackendError::OutOfMemory);
        }
        match validation {
            Some(e) => Err(failed(e.to_string())),
            None => Ok(resource),
        }
    }

    /// Map a `MAP_READ` buffer and copy its contents out.
    fn map_read(&self, staging: &wgpu::Buffer) -> BackendResult<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| BackendError::ReadbackFailed("map callback never ran".into()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.scoped(
            |device| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: desc.label.as_deref(),
                    size: desc.size,
                    usage: Self::convert_buffer_usage(desc.usage),
                    mapped_at_creation: false,
                })
            },
            BackendError::BufferCreationFailed,
        )?;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }

        let texture = self.scoped(
            |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: Self::convert_texture_usage(desc.usage),
                    view_formats: &[],
                })
            },
            BackendError::TextureCreationFailed,
        )?;

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, texture);

        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(id, (texture.0, view));

        Ok(TextureViewHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match &e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage {
                            read_only: *read_only,
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingType::StorageTexture { format } => wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: Self::convert_texture_format(*format),
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                };

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });

        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.bind_group_layouts.insert(id, layout);

        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;

        let wgpu_entries = entries
            .iter()
            .map(|(binding, entry)| {
                let resource = match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        let buf = self.buffers.get(&buffer.0).ok_or(
                            BackendError::UnknownHandle { kind: "buffer", id: buffer.0 },
                        )?;
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: buf,
                            offset: *offset,
                            size: size.and_then(std::num::NonZeroU64::new),
                        })
                    }
                    BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                        let (_, v) = self.texture_views.get(&view.0).ok_or(
                            BackendError::UnknownHandle { kind: "texture view", id: view.0 },
                        )?;
                        wgpu::BindingResource::TextureView(v)
                    }
                };

                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });

        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, bind_group);

        Ok(BindGroupHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
            });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        let id = self.next_compute_pipeline_id;
        self.next_compute_pipeline_id += 1;
        self.compute_pipelines.insert(id, pipeline);

        Ok(ComputePipelineHandle(id))
    }

    fn begin_frame(&mut self) {
        self.encoder_mut();
    }

    fn end_frame(&mut self) {
        self.flush();
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        let Some(pending) = self.pending_compute_pass.take() else {
            return;
        };

        self.encoder_mut();
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };

        let compute_pipelines = &self.compute_pipelines;
        let bind_groups = &self.bind_groups;

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: pending.label.as_deref(),
                timestamp_writes: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    ComputeCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = compute_pipelines.get(&handle.0) {
                            compute_pass.set_pipeline(pipeline);
                        }
                    }
                    ComputeCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = bind_groups.get(&bind_group.0) {
                            compute_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    ComputeCommand::Dispatch { x, y, z } => {
                        compute_pass.dispatch_workgroups(*x, *y, *z);
                    }
                }
            }
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending
                .commands
                .push(ComputeCommand::SetBindGroup { index, bind_group });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::Dispatch { x, y, z });
        }
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.encoder_mut();
        let (Some(src), Some(dst), Some(encoder)) = (
            self.textures.get(&src.0),
            self.textures.get(&dst.0),
            self.encoder.as_mut(),
        ) else {
            return;
        };

        encoder.copy_texture_to_texture(
            src.as_image_copy(),
            dst.as_image_copy(),
            wgpu::Extent3d {
                width: src.width().min(dst.width()),
                height: src.height().min(dst.height()),
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.flush();

        let size = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownHandle { kind: "buffer", id: buffer.0 })?
            .size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Buffer Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        if let Some(source) = self.buffers.get(&buffer.0) {
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        self.map_read(&staging)
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TexelData> {
        self.flush();

        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle { kind: "texture", id: texture.0 })?;
        let format = Self::convert_texture_format_back(tex.format()).ok_or_else(|| {
            BackendError::ReadbackFailed(format!("unsupported format {:?}", tex.format()))
        })?;
        let (width, height) = (tex.width(), tex.height());

        let unpadded_row = width * format.bytes_per_pixel();
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Readback"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            tex.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = self.map_read(&staging)?;

        let mut texels = Vec::with_capacity((width * height) as usize);
        for row in bytes.chunks(padded_row as usize).take(height as usize) {
            let row = &row[..unpadded_row as usize];
            match format {
                TextureFormat::Rgba32Float => {
                    let floats: Vec<f32> = bytemuck::pod_collect_to_vec(row);
                    texels.extend(floats.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]));
                }
                TextureFormat::Rgba16Float => {
                    let halves: Vec<u16> = bytemuck::pod_collect_to_vec(row);
                    texels.extend(
                        halves
                            .chunks_exact(4)
                            .map(|c| [0, 1, 2, 3].map(|i| f16::from_bits(c[i]).to_f32())),
                    );
                }
            }
        }

        Ok(TexelData {
            width,
            height,
            texels,
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.texture_views.retain(|_, (tex, _)| *tex != texture.0);
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.destroy();
        }
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
