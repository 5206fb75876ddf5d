//! GPU resource ownership
//!
//! Vertex buffers written by the sampler and the maps written by the kernels.

mod buffers;
mod maps;

pub use buffers::*;
pub use maps::*;
