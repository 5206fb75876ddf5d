//! Transfer kernel definitions
//!
//! The two kernel variants share one uniform block and one binding table. The
//! WGSL sources live next to the host evaluation of the same math, which the
//! CPU backend runs when it is asked to dispatch one of these entry points.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};

/// Threads per workgroup along each axis of the output maps.
pub const WORKGROUP_SIZE: u32 = 8;

/// Binding slots in group 0.
pub mod bindings {
    pub const PARAMS: u32 = 0;
    pub const POSITION_BUFFER: u32 = 1;
    pub const NORMAL_BUFFER: u32 = 2;
    /// `OldPositionBuffer` for the non-optimal kernel, the previous position
    /// map for the optimal kernel.
    pub const PREVIOUS_POSITIONS: u32 = 3;
    pub const POSITION_MAP: u32 = 4;
    pub const VELOCITY_MAP: u32 = 5;
    pub const NORMAL_MAP: u32 = 6;
}

/// Kernel variant, indexed like the compute kernels they select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKernel {
    /// Previous positions come from an explicit previous-position buffer.
    NonOptimal = 0,
    /// Previous positions come from last frame's position map.
    Optimal = 1,
}

impl TransferKernel {
    pub fn for_mode(optimal: bool) -> Self {
        if optimal {
            TransferKernel::Optimal
        } else {
            TransferKernel::NonOptimal
        }
    }

    pub fn index(&self) -> u32 {
        *self as u32
    }

    pub fn entry_point(&self) -> &'static str {
        match self {
            TransferKernel::NonOptimal => "transfer_non_optimal",
            TransferKernel::Optimal => "transfer_optimal",
        }
    }

    pub fn from_entry_point(name: &str) -> Option<Self> {
        match name {
            "transfer_non_optimal" => Some(TransferKernel::NonOptimal),
            "transfer_optimal" => Some(TransferKernel::Optimal),
            _ => None,
        }
    }

    /// Complete WGSL module for this variant.
    pub fn shader_source(&self) -> String {
        let previous = match self {
            TransferKernel::NonOptimal => NON_OPTIMAL_BINDING,
            TransferKernel::Optimal => OPTIMAL_BINDING,
        };
        format!("{TRANSFER_COMMON}{previous}")
    }
}

/// Uniform block shared by both kernels.
///
/// `old_transform` is only read by the non-optimal kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TransferUniform {
    pub transform: Mat4,
    pub old_transform: Mat4,
    pub vertex_count: u32,
    pub frame_rate: f32,
    pub map_width: u32,
    pub _padding: u32,
}

/// Where the kernel finds last frame's world-space position of a vertex.
pub enum VelocitySource<'a> {
    /// Flat `xyz` triples in object space, transformed by `old_transform`.
    PreviousBuffer(&'a [f32]),
    /// Last frame's position map, already in world space.
    PreviousMap { texels: &'a [[f32; 4]], width: u32 },
}

impl VelocitySource<'_> {
    fn previous_position(&self, index: usize, x: u32, y: u32, old_transform: &Mat4) -> Vec3 {
        match self {
            VelocitySource::PreviousBuffer(positions) => {
                old_transform.transform_point3(read_vec3(positions, index))
            }
            VelocitySource::PreviousMap { texels, width } => {
                let t = texels[(y * width + x) as usize];
                Vec3::new(t[0], t[1], t[2])
            }
        }
    }
}

/// Values one kernel invocation writes to the three maps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexelOutput {
    pub position: Vec4,
    pub velocity: Vec4,
    pub normal: Vec4,
}

fn read_vec3(data: &[f32], index: usize) -> Vec3 {
    let base = index * 3;
    Vec3::new(data[base], data[base + 1], data[base + 2])
}

/// Host evaluation of one invocation at pixel `(x, y)`.
///
/// Returns `None` for pixels past the last vertex, which the GPU kernels leave
/// untouched.
pub fn evaluate_texel(
    params: &TransferUniform,
    positions: &[f32],
    normals: &[f32],
    previous: &VelocitySource<'_>,
    x: u32,
    y: u32,
) -> Option<TexelOutput> {
    if x >= params.map_width {
        return None;
    }
    let index = y * params.map_width + x;
    if index >= params.vertex_count {
        return None;
    }
    let index = index as usize;

    let position = params
        .transform
        .transform_point3(read_vec3(positions, index));
    let previous_position = previous.previous_position(index, x, y, &params.old_transform);
    let velocity = (position - previous_position) * params.frame_rate;

    let normal = Mat3::from_mat4(params.transform) * read_vec3(normals, index);
    let normal = normal.normalize_or_zero();

    Some(TexelOutput {
        position: position.extend(1.0),
        velocity: velocity.extend(0.0),
        normal: normal.extend(0.0),
    })
}

const TRANSFER_COMMON: &str = r#"
struct TransferParams {
    transform: mat4x4<f32>,
    old_transform: mat4x4<f32>,
    vertex_count: u32,
    frame_rate: f32,
    map_width: u32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> params: TransferParams;
@group(0) @binding(1) var<storage, read> position_buffer: array<f32>;
@group(0) @binding(2) var<storage, read> normal_buffer: array<f32>;
@group(0) @binding(4) var position_map: texture_storage_2d<rgba32float, write>;
@group(0) @binding(5) var velocity_map: texture_storage_2d<rgba16float, write>;
@group(0) @binding(6) var normal_map: texture_storage_2d<rgba16float, write>;

fn read_vec3(data_index: u32, is_normal: bool) -> vec3<f32> {
    let base = data_index * 3u;
    if is_normal {
        return vec3<f32>(normal_buffer[base], normal_buffer[base + 1u], normal_buffer[base + 2u]);
    }
    return vec3<f32>(position_buffer[base], position_buffer[base + 1u], position_buffer[base + 2u]);
}

fn vertex_index(id: vec3<u32>) -> u32 {
    if id.x >= params.map_width {
        return 0xffffffffu;
    }
    return id.y * params.map_width + id.x;
}

fn write_maps(id: vec3<u32>, position: vec3<f32>, previous: vec3<f32>, index: u32) {
    let velocity = (position - previous) * params.frame_rate;

    let basis = mat3x3<f32>(
        params.transform[0].xyz,
        params.transform[1].xyz,
        params.transform[2].xyz,
    );
    var normal = basis * read_vec3(index, true);
    let norm_len = length(normal);
    if norm_len > 0.0 {
        normal = normal / norm_len;
    }

    let texel = vec2<i32>(id.xy);
    textureStore(position_map, texel, vec4<f32>(position, 1.0));
    textureStore(velocity_map, texel, vec4<f32>(velocity, 0.0));
    textureStore(normal_map, texel, vec4<f32>(normal, 0.0));
}
"#;

const NON_OPTIMAL_BINDING: &str = r#"
@group(0) @binding(3) var<storage, read> old_position_buffer: array<f32>;

@compute @workgroup_size(8, 8, 1)
fn transfer_non_optimal(@builtin(global_invocation_id) id: vec3<u32>) {
    let index = vertex_index(id);
    if index >= params.vertex_count {
        return;
    }

    let position = (params.transform * vec4<f32>(read_vec3(index, false), 1.0)).xyz;
    let base = index * 3u;
    let old = vec3<f32>(
        old_position_buffer[base],
        old_position_buffer[base + 1u],
        old_position_buffer[base + 2u],
    );
    let previous = (params.old_transform * vec4<f32>(old, 1.0)).xyz;

    write_maps(id, position, previous, index);
}
"#;

const OPTIMAL_BINDING: &str = r#"
@group(0) @binding(3) var previous_position_map: texture_2d<f32>;

@compute @workgroup_size(8, 8, 1)
fn transfer_optimal(@builtin(global_invocation_id) id: vec3<u32>) {
    let index = vertex_index(id);
    if index >= params.vertex_count {
        return;
    }

    let position = (params.transform * vec4<f32>(read_vec3(index, false), 1.0)).xyz;
    let previous = textureLoad(previous_position_map, vec2<i32>(id.xy), 0).xyz;

    write_maps(id, position, previous, index);
}
"#;
