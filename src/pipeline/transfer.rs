//! GPU transfer stage
//!
//! Turns the sampled vertex buffers into the position, velocity and normal
//! maps with one compute dispatch per frame.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::kernel::{bindings, TransferKernel, TransferUniform, WORKGROUP_SIZE};
use crate::profile_scope;
use crate::resources::{
    OutputMaps, PositionBufferPair, NORMAL_MAP_FORMAT, POSITION_MAP_FORMAT, VELOCITY_MAP_FORMAT,
};
use crate::BakerError;
use glam::Mat4;
use std::collections::HashMap;

/// Velocity scale for a frame that lasted `dt` seconds.
///
/// Zero for zero, negative or non-finite frame times, which makes the whole
/// velocity map zero instead of infinite.
pub fn frame_rate(dt: f32) -> f32 {
    if dt.is_finite() && dt > 0.0 {
        1.0 / dt
    } else {
        0.0
    }
}

/// Per-frame inputs of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferInputs {
    pub transform: Mat4,
    /// Only read by the non-optimal kernel
    pub old_transform: Mat4,
    pub frame_rate: f32,
}

struct KernelPipeline {
    layout: BindGroupLayoutHandle,
    pipeline: ComputePipelineHandle,
}

/// Owns both kernel pipelines, the uniform buffer and the bind groups.
pub struct TransferStage {
    kernels: Vec<KernelPipeline>,
    uniform: BufferHandle,
    // Keyed by the buffer being read as "current"; two entries alternate in
    // non-optimal mode, one in optimal mode.
    bind_groups: HashMap<(TransferKernel, BufferHandle), BindGroupHandle>,
    label: String,
}

fn layout_entries(kernel: TransferKernel) -> Vec<BindGroupLayoutEntry> {
    let previous = match kernel {
        TransferKernel::NonOptimal => BindingType::StorageBuffer { read_only: true },
        TransferKernel::Optimal => BindingType::Texture,
    };
    vec![
        BindGroupLayoutEntry {
            binding: bindings::PARAMS,
            ty: BindingType::UniformBuffer,
        },
        BindGroupLayoutEntry {
            binding: bindings::POSITION_BUFFER,
            ty: BindingType::StorageBuffer { read_only: true },
        },
        BindGroupLayoutEntry {
            binding: bindings::NORMAL_BUFFER,
            ty: BindingType::StorageBuffer { read_only: true },
        },
        BindGroupLayoutEntry {
            binding: bindings::PREVIOUS_POSITIONS,
            ty: previous,
        },
        BindGroupLayoutEntry {
            binding: bindings::POSITION_MAP,
            ty: BindingType::StorageTexture {
                format: POSITION_MAP_FORMAT,
            },
        },
        BindGroupLayoutEntry {
            binding: bindings::VELOCITY_MAP,
            ty: BindingType::StorageTexture {
                format: VELOCITY_MAP_FORMAT,
            },
        },
        BindGroupLayoutEntry {
            binding: bindings::NORMAL_MAP,
            ty: BindingType::StorageTexture {
                format: NORMAL_MAP_FORMAT,
            },
        },
    ]
}

fn whole_buffer(buffer: BufferHandle) -> BindGroupEntry {
    BindGroupEntry::Buffer {
        buffer,
        offset: 0,
        size: None,
    }
}

impl TransferStage {
    /// Build both kernel variants so a mode switch never compiles shaders.
    pub fn create<B: ComputeBackend + ?Sized>(backend: &mut B, label: &str) -> BackendResult<Self> {
        let uniform = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{label} Transfer Params")),
            size: std::mem::size_of::<TransferUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;

        let mut stage = Self {
            kernels: Vec::with_capacity(2),
            uniform,
            bind_groups: HashMap::new(),
            label: label.to_string(),
        };

        for kernel in [TransferKernel::NonOptimal, TransferKernel::Optimal] {
            match Self::build_kernel(backend, kernel, label) {
                Ok(k) => stage.kernels.push(k),
                Err(e) => {
                    stage.destroy(backend);
                    return Err(e);
                }
            }
        }

        log::debug!("{}: transfer kernels ready", label);
        Ok(stage)
    }

    fn build_kernel<B: ComputeBackend + ?Sized>(
        backend: &mut B,
        kernel: TransferKernel,
        label: &str,
    ) -> BackendResult<KernelPipeline> {
        let layout = backend.create_bind_group_layout(&layout_entries(kernel))?;
        let pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(format!("{label} {}", kernel.entry_point())),
            shader: kernel.shader_source(),
            entry_point: kernel.entry_point().to_string(),
            bind_group_layouts: vec![layout],
        });
        match pipeline {
            Ok(pipeline) => Ok(KernelPipeline { layout, pipeline }),
            Err(e) => {
                backend.destroy_bind_group_layout(layout);
                Err(e)
            }
        }
    }

    fn kernel(&self, kernel: TransferKernel) -> Result<&KernelPipeline, BakerError> {
        self.kernels
            .get(kernel.index() as usize)
            .ok_or(BakerError::MissingResource("transfer kernel"))
    }

    fn bind_group<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        kernel: TransferKernel,
        buffers: &PositionBufferPair,
        maps: &OutputMaps,
    ) -> Result<BindGroupHandle, BakerError> {
        let key = (kernel, buffers.current());
        if let Some(&bind_group) = self.bind_groups.get(&key) {
            return Ok(bind_group);
        }

        let previous = match kernel {
            TransferKernel::NonOptimal => whole_buffer(
                buffers
                    .previous()
                    .ok_or(BakerError::MissingResource("previous position buffer"))?,
            ),
            TransferKernel::Optimal => BindGroupEntry::Texture(
                maps.history()
                    .ok_or(BakerError::MissingResource("position history"))?
                    .view,
            ),
        };

        let entries = [
            (bindings::PARAMS, whole_buffer(self.uniform)),
            (bindings::POSITION_BUFFER, whole_buffer(buffers.current())),
            (bindings::NORMAL_BUFFER, whole_buffer(buffers.normals())),
            (bindings::PREVIOUS_POSITIONS, previous),
            (
                bindings::POSITION_MAP,
                BindGroupEntry::StorageTexture(maps.position.view),
            ),
            (
                bindings::VELOCITY_MAP,
                BindGroupEntry::StorageTexture(maps.velocity.view),
            ),
            (
                bindings::NORMAL_MAP,
                BindGroupEntry::StorageTexture(maps.normal.view),
            ),
        ];

        let layout = self.kernel(kernel)?.layout;
        let bind_group = backend.create_bind_group(layout, &entries)?;
        self.bind_groups.insert(key, bind_group);
        log::trace!(
            "{}: created {} bind group",
            self.label,
            kernel.entry_point()
        );
        Ok(bind_group)
    }

    /// Drop cached bind groups. Required whenever a bound resource is
    /// reallocated, i.e. on every mode change.
    pub fn invalidate<B: ComputeBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, bind_group) in self.bind_groups.drain() {
            backend.destroy_bind_group(bind_group);
        }
    }

    /// Record this frame's dispatch.
    ///
    /// The kernel variant follows the mode of `buffers`. In optimal mode the
    /// position map is first copied into the history texture on the GPU so the
    /// kernel can read last frame while overwriting it.
    pub fn transfer<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        buffers: &PositionBufferPair,
        maps: &OutputMaps,
        inputs: &TransferInputs,
    ) -> Result<(), BakerError> {
        profile_scope!("transfer");

        let kernel = TransferKernel::for_mode(buffers.is_optimal());
        let uniform = TransferUniform {
            transform: inputs.transform,
            old_transform: inputs.old_transform,
            vertex_count: maps.layout.vertex_count,
            frame_rate: inputs.frame_rate,
            map_width: maps.layout.width,
            _padding: 0,
        };
        backend.write_buffer(self.uniform, 0, bytemuck::bytes_of(&uniform));

        let bind_group = self.bind_group(backend, kernel, buffers, maps)?;
        let pipeline = self.kernel(kernel)?.pipeline;

        if kernel == TransferKernel::Optimal {
            maps.capture_history(backend);
        }

        let (groups_x, groups_y) = maps.layout.workgroups(WORKGROUP_SIZE);
        backend.begin_compute_pass(Some(kernel.entry_point()));
        backend.set_compute_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.dispatch_compute(groups_x, groups_y, 1);
        backend.end_compute_pass();

        log::trace!(
            "{}: kernel {} dispatched {}x{} groups at {:.1} fps",
            self.label,
            kernel.index(),
            groups_x,
            groups_y,
            inputs.frame_rate
        );
        Ok(())
    }

    pub fn destroy<B: ComputeBackend + ?Sized>(mut self, backend: &mut B) {
        self.invalidate(backend);
        for kernel in self.kernels.drain(..) {
            backend.destroy_compute_pipeline(kernel.pipeline);
            backend.destroy_bind_group_layout(kernel.layout);
        }
        backend.destroy_buffer(self.uniform);
    }
}
