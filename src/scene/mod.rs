//! Scene-side inputs: animated sources and root transform history

mod source;
mod transform;

pub use source::*;
pub use transform::*;
