//! Backend abstraction layer
//!
//! Provides common traits and types that both the wgpu and CPU backends implement.

pub mod cpu;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use cpu::CpuBackend;
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
