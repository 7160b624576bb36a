//! GPU bring-up, scene sequencing and presentation for a fixed-function
//! handheld GPU.
//!
//! The native driver sits behind [`driver::GpuDriver`]; everything above it
//! is ordinary owned Rust. [`graphics::Graphics`] is the entry point.

pub mod color;
pub mod context;
pub mod display;
pub mod driver;
pub mod error;
pub mod graphics;
pub mod input;
pub mod logging;
pub mod memory;
pub mod shader;
pub mod surface;

#[cfg(test)]
mod test_support;

pub use error::{AllocationError, GraphicsError, Result, ShaderError};
pub use graphics::{Graphics, GraphicsFailure, GraphicsInit};
