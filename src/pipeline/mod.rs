//! Per-frame baking pipeline
//!
//! 1. Sampler - bakes every source into the current vertex buffers
//! 2. Transfer - one compute dispatch writes position, velocity and normal maps

pub mod kernel;
pub mod sampler;
pub mod transfer;

pub use kernel::{TransferKernel, TransferUniform, WORKGROUP_SIZE};
pub use sampler::MeshSampler;
pub use transfer::{frame_rate, TransferInputs, TransferStage};
