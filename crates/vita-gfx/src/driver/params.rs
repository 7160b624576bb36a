//! Parameter blocks for driver entry points.

use std::sync::Arc;

use super::format::{
    AttributeFormat, ColorFormat, ColorSurfaceScale, ColorSurfaceType, DepthStencilFormat,
    DepthStencilSurfaceType, IndexSource, MultisampleMode, OutputRegisterSize, PixelFormat,
};
use super::types::{BlockId, DeviceAddress, HostPtr};

/// Payload carried by each display-queue entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DisplayData {
    pub address: DeviceAddress,
}

/// Invoked from the driver's queue thread once a buffer is ready to be shown.
pub type DisplayCallback = Arc<dyn Fn(&DisplayData) + Send + Sync>;

pub struct InitializeParams {
    pub flags: u32,
    pub display_queue_max_pending_count: u32,
    pub display_queue_callback: DisplayCallback,
    pub parameter_buffer_size: u32,
}

/// A mapped data region handed to the driver.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub address: DeviceAddress,
    pub size: u32,
}

/// A region mapped as shader microcode, plus its offset within the USSE heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UsseRegion {
    pub address: DeviceAddress,
    pub size: u32,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct ContextParams {
    pub host_mem_size: usize,
    pub vdm_ring_buffer: Region,
    pub vertex_ring_buffer: Region,
    pub fragment_ring_buffer: Region,
    pub fragment_usse_ring_buffer: UsseRegion,
    pub vertex_usse_ring_buffer: Option<UsseRegion>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenderTargetParams {
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    pub scenes_per_frame: u32,
    pub multisample_mode: MultisampleMode,
    pub multisample_locations: u32,
    /// `None` lets the driver allocate its own bookkeeping memory.
    pub driver_mem_block: Option<BlockId>,
}

/// Color surface descriptor bound to one display buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ColorSurface {
    pub format: ColorFormat,
    pub surface_type: ColorSurfaceType,
    pub scale: ColorSurfaceScale,
    pub output_register_size: OutputRegisterSize,
    pub width: u32,
    pub height: u32,
    pub stride_in_pixels: u32,
    pub data: DeviceAddress,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DepthStencilSurface {
    pub format: DepthStencilFormat,
    pub surface_type: DepthStencilSurfaceType,
    pub stride_in_samples: u32,
    pub depth_data: DeviceAddress,
    pub stencil_data: Option<DeviceAddress>,
}

/// Host-side allocator the patcher uses for its bookkeeping heap.
///
/// Kept apart from GPU-mapped memory. Implementations must be callable from
/// any thread.
pub trait HostHeap: Send + Sync {
    fn allocate(&self, size: usize) -> Option<HostPtr>;
    fn free(&self, ptr: HostPtr);
}

pub struct PatcherParams {
    pub host_heap: Arc<dyn HostHeap>,
    pub buffer: Region,
    pub vertex_usse: UsseRegion,
    pub fragment_usse: UsseRegion,
}

/// Vertex attribute layout; `reg_index` is resolved from program reflection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexAttribute {
    pub stream_index: u16,
    pub offset: u16,
    pub format: AttributeFormat,
    pub component_count: u8,
    pub reg_index: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VertexStream {
    pub stride: u16,
    pub index_source: IndexSource,
}

/// Frame buffer description handed to the OS display service.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameBuf {
    pub base: DeviceAddress,
    pub pitch: u32,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}
