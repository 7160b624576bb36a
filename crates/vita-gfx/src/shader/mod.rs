//! Shader binaries, the patcher that links them into programs, and the
//! vertex stream layouts programs are created against.

mod binary;
mod host_heap;
mod patcher;
mod stream;

pub use binary::{ProgramParameter, ShaderBinary, ShaderStage};
pub use host_heap::TrackingHostHeap;
pub use patcher::{AttributeBinding, AttributeLayout, PatcherSizes, ProgramRegistration, ShaderPatcher};
pub use stream::{BasicVertex, ClearVertex, StreamCache, VertexStreamType};
