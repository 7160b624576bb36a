//! Native GPU driver boundary.
//!
//! Everything the graphics core needs from the kernel memory service and the
//! GPU driver goes through [`GpuDriver`]. The trait mirrors the driver's entry
//! points one-to-one; sequencing and ownership live above it.
//!
//! [`HeadlessDriver`] implements the contract in-process for hosts without
//! the console hardware.

mod error;
mod format;
mod headless;
mod params;
mod types;

use std::sync::Arc;

use crate::shader::{ProgramParameter, ShaderBinary};

pub use error::{code, DriverError};
pub use format::{
    AttributeFormat, ColorFormat, ColorSurfaceScale, ColorSurfaceType, DepthStencilFormat,
    DepthStencilSurfaceType, IndexFormat, IndexSource, MultisampleMode, OutputRegisterFormat,
    OutputRegisterSize, ParameterCategory, PixelFormat, PrimitiveType, SetBufMode,
};
pub use headless::{HeadlessDisplay, HeadlessDriver, HeadlessStats};
pub use params::{
    ColorSurface, ContextParams, DepthStencilSurface, DisplayCallback, DisplayData, FrameBuf,
    HostHeap, InitializeParams, PatcherParams, Region, RenderTargetParams, UsseRegion,
    VertexAttribute, VertexStream,
};
pub use types::{
    BlockId, ContextHandle, DeviceAddress, FragmentProgramHandle, HostPtr, MemBlockKind,
    MemoryAttribs, PatcherHandle, ProgramId, RenderTargetHandle, SyncObjectHandle, UniformBuffer,
    VertexProgramHandle,
};

pub type DriverResult<T> = Result<T, DriverError>;

/// Native GPU driver and kernel memory entry points.
///
/// Implementations are driven from a single thread. The only concurrency is
/// inside the driver: the display-queue callback registered at
/// [`initialize`](GpuDriver::initialize) runs on a driver-owned thread.
pub trait GpuDriver {
    // ── kernel memory ────────────────────────────────────────────────────

    fn alloc_mem_block(&mut self, name: &str, kind: MemBlockKind, size: u32) -> DriverResult<BlockId>;
    fn mem_block_base(&self, block: BlockId) -> DriverResult<DeviceAddress>;
    fn free_mem_block(&mut self, block: BlockId) -> DriverResult<()>;

    // ── GPU mapping ──────────────────────────────────────────────────────

    fn map_memory(&mut self, base: DeviceAddress, size: u32, attribs: MemoryAttribs) -> DriverResult<()>;
    fn unmap_memory(&mut self, base: DeviceAddress) -> DriverResult<()>;

    /// Maps a block as vertex microcode; returns its offset within the USSE heap.
    fn map_vertex_usse_memory(&mut self, base: DeviceAddress, size: u32) -> DriverResult<u32>;
    fn unmap_vertex_usse_memory(&mut self, base: DeviceAddress) -> DriverResult<()>;

    /// Maps a block as fragment microcode; returns its offset within the USSE heap.
    fn map_fragment_usse_memory(&mut self, base: DeviceAddress, size: u32) -> DriverResult<u32>;
    fn unmap_fragment_usse_memory(&mut self, base: DeviceAddress) -> DriverResult<()>;

    /// CPU write into mapped memory.
    fn write_memory(&mut self, address: DeviceAddress, bytes: &[u8]) -> DriverResult<()>;
    /// Fills `len` bytes starting at `address` with a repeated 32-bit word.
    fn fill_memory(&mut self, address: DeviceAddress, len: u32, word: u32) -> DriverResult<()>;

    // ── lifecycle ────────────────────────────────────────────────────────

    fn initialize(&mut self, params: InitializeParams) -> DriverResult<()>;
    fn terminate(&mut self) -> DriverResult<()>;

    fn create_context(&mut self, params: &ContextParams) -> DriverResult<ContextHandle>;
    fn destroy_context(&mut self, context: ContextHandle) -> DriverResult<()>;

    fn create_render_target(&mut self, params: &RenderTargetParams) -> DriverResult<RenderTargetHandle>;
    fn destroy_render_target(&mut self, target: RenderTargetHandle) -> DriverResult<()>;

    fn color_surface_init(&mut self, surface: &ColorSurface) -> DriverResult<()>;
    fn depth_stencil_surface_init(&mut self, surface: &DepthStencilSurface) -> DriverResult<()>;

    fn sync_object_create(&mut self) -> DriverResult<SyncObjectHandle>;
    fn sync_object_destroy(&mut self, sync: SyncObjectHandle) -> DriverResult<()>;

    // ── scenes & presentation ────────────────────────────────────────────

    fn begin_scene(
        &mut self,
        context: ContextHandle,
        target: RenderTargetHandle,
        fragment_sync: SyncObjectHandle,
        color: &ColorSurface,
        depth: &DepthStencilSurface,
    ) -> DriverResult<()>;
    fn end_scene(&mut self, context: ContextHandle) -> DriverResult<()>;
    fn pad_heartbeat(&mut self, color: &ColorSurface, sync: SyncObjectHandle) -> DriverResult<()>;

    /// Queues a flip from `old_sync`'s buffer to `new_sync`'s buffer.
    ///
    /// Blocks while the configured maximum number of flips is outstanding.
    fn display_queue_add_entry(
        &mut self,
        old_sync: SyncObjectHandle,
        new_sync: SyncObjectHandle,
        data: DisplayData,
    ) -> DriverResult<()>;
    /// Blocks until every queued flip has been handed to the display.
    fn display_queue_finish(&mut self) -> DriverResult<()>;
    /// Blocks until the GPU has completed every submitted scene.
    fn finish(&mut self, context: ContextHandle) -> DriverResult<()>;

    // ── shader patcher ───────────────────────────────────────────────────

    fn program_check(&self, binary: &ShaderBinary) -> DriverResult<()>;

    fn shader_patcher_create(&mut self, params: PatcherParams) -> DriverResult<PatcherHandle>;
    fn shader_patcher_destroy(&mut self, patcher: PatcherHandle) -> DriverResult<()>;

    fn shader_patcher_register_program(
        &mut self,
        patcher: PatcherHandle,
        binary: Arc<ShaderBinary>,
    ) -> DriverResult<ProgramId>;
    fn shader_patcher_unregister_program(&mut self, patcher: PatcherHandle, id: ProgramId) -> DriverResult<()>;
    fn shader_patcher_program_from_id(&self, patcher: PatcherHandle, id: ProgramId) -> Option<Arc<ShaderBinary>>;

    fn shader_patcher_create_vertex_program(
        &mut self,
        patcher: PatcherHandle,
        id: ProgramId,
        attributes: &[VertexAttribute],
        streams: &[VertexStream],
    ) -> DriverResult<VertexProgramHandle>;
    fn shader_patcher_create_fragment_program(
        &mut self,
        patcher: PatcherHandle,
        id: ProgramId,
        output_format: OutputRegisterFormat,
        multisample_mode: MultisampleMode,
        vertex_program: Option<ProgramId>,
    ) -> DriverResult<FragmentProgramHandle>;
    fn shader_patcher_release_vertex_program(
        &mut self,
        patcher: PatcherHandle,
        program: VertexProgramHandle,
    ) -> DriverResult<()>;
    fn shader_patcher_release_fragment_program(
        &mut self,
        patcher: PatcherHandle,
        program: FragmentProgramHandle,
    ) -> DriverResult<()>;

    // ── draw state ───────────────────────────────────────────────────────

    fn set_vertex_program(&mut self, context: ContextHandle, program: VertexProgramHandle) -> DriverResult<()>;
    fn set_fragment_program(&mut self, context: ContextHandle, program: FragmentProgramHandle) -> DriverResult<()>;
    fn set_vertex_stream(&mut self, context: ContextHandle, stream_index: u32, data: DeviceAddress) -> DriverResult<()>;
    fn reserve_vertex_default_uniform_buffer(&mut self, context: ContextHandle) -> DriverResult<UniformBuffer>;
    fn set_uniform_data_f(
        &mut self,
        buffer: UniformBuffer,
        parameter: &ProgramParameter,
        component_offset: u32,
        values: &[f32],
    ) -> DriverResult<()>;
    fn draw(
        &mut self,
        context: ContextHandle,
        primitive: PrimitiveType,
        index_format: IndexFormat,
        index_data: DeviceAddress,
        index_count: u32,
    ) -> DriverResult<()>;
}
