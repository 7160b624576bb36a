//! Device memory: kernel blocks mapped into GPU address space.

mod allocator;

pub use allocator::{align_up, DeviceAllocator, Mapping, MemoryBlock};
