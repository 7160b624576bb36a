//! The graphics owner: brings the driver up in the required order, runs the
//! per-frame scene/present cycle and tears everything down again.

mod init;

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::color;
use crate::context::GraphicsContext;
use crate::display::{present_callback, BufferState, DisplayChain, DisplayService, PresentTracker};
use crate::driver::{
    BlockId, DeviceAddress, FragmentProgramHandle, GpuDriver, IndexFormat, InitializeParams,
    MemBlockKind, MemoryAttribs, PrimitiveType, VertexProgramHandle, VertexStream,
};
use crate::error::{GraphicsError, Result};
use crate::memory::{DeviceAllocator, MemoryBlock};
use crate::shader::{
    AttributeBinding, ProgramParameter, ProgramRegistration, ShaderBinary, ShaderPatcher,
    VertexStreamType,
};
use crate::surface::{DepthStencilBuffer, RenderTarget};

pub use init::{
    GraphicsInit, DEBUG_FILL_COLOR, DEFAULT_PARAMETER_BUFFER_SIZE, DISPLAY_BUFFER_COUNT,
    DISPLAY_HEIGHT, DISPLAY_MAX_PENDING_SWAPS, DISPLAY_STRIDE_IN_PIXELS, DISPLAY_WIDTH,
};

/// A failed init or shutdown, handing the driver back to the caller.
pub struct GraphicsFailure<D> {
    pub driver: D,
    pub error: GraphicsError,
}

impl<D> GraphicsFailure<D> {
    pub fn into_error(self) -> GraphicsError {
        self.error
    }
}

impl<D> fmt::Debug for GraphicsFailure<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsFailure").field("error", &self.error).finish_non_exhaustive()
    }
}

impl<D> fmt::Display for GraphicsFailure<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<D> std::error::Error for GraphicsFailure<D> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Everything built during init, in creation order.
#[derive(Default)]
struct Parts {
    context: Option<GraphicsContext>,
    render_target: Option<RenderTarget>,
    chain: Option<DisplayChain>,
    depth: Option<DepthStencilBuffer>,
    patcher: Option<ShaderPatcher>,
}

impl Parts {
    /// Tears down whatever was built, newest first.
    fn unwind<D: GpuDriver>(self, allocator: &mut DeviceAllocator, driver: &mut D) {
        if let Some(patcher) = self.patcher {
            if let Err(err) = patcher.destroy(allocator, driver) {
                log::warn!("unwinding shader patcher: {err}");
            }
        }
        if let Some(depth) = self.depth {
            depth.release(allocator, driver);
        }
        if let Some(mut chain) = self.chain {
            chain.release(allocator, driver);
        }
        if let Some(rt) = self.render_target {
            if let Err(err) = rt.destroy(driver) {
                log::warn!("unwinding render target: {err}");
            }
        }
        if let Some(context) = self.context {
            if let Err(err) = context.destroy(allocator, driver) {
                log::warn!("unwinding context: {err}");
            }
        }
    }
}

/// Owns the driver and every GPU resource the demo uses.
///
/// Constructed once with [`init`](Self::init) and passed by reference to
/// whatever draws; [`shutdown`](Self::shutdown) drains the GPU and the
/// display queue before any memory is released.
#[derive(Debug)]
pub struct Graphics<D: GpuDriver> {
    driver: D,
    allocator: DeviceAllocator,
    config: GraphicsInit,
    tracker: PresentTracker,
    context: GraphicsContext,
    render_target: RenderTarget,
    chain: DisplayChain,
    depth: DepthStencilBuffer,
    patcher: ShaderPatcher,
}

impl<D: GpuDriver> Graphics<D> {
    /// Initializes the driver and creates, in order: the context, the render
    /// target, the display buffers with their sync objects, the depth/stencil
    /// surface and the shader patcher.
    ///
    /// On failure everything created so far is torn down and the driver is
    /// returned with the error.
    pub fn init(
        mut driver: D,
        display: Arc<dyn DisplayService>,
        config: GraphicsInit,
    ) -> std::result::Result<Self, GraphicsFailure<D>> {
        if let Err(error) = config.validate() {
            return Err(GraphicsFailure { driver, error });
        }

        let tracker = PresentTracker::new();
        let params = InitializeParams {
            flags: 0,
            display_queue_max_pending_count: config.max_pending_swaps,
            display_queue_callback: present_callback(display, config.geometry(), tracker.clone()),
            parameter_buffer_size: config.parameter_buffer_size,
        };
        if let Err(err) = driver.initialize(params) {
            log::error!("driver initialization failed: {err}");
            let error = if err.is_already_initialized() {
                GraphicsError::AlreadyInitialized
            } else {
                err.into()
            };
            return Err(GraphicsFailure { driver, error });
        }
        log::info!(
            "graphics initialized: {}x{} (stride {}), {} buffers, {} pending swaps, {:?}",
            config.width,
            config.height,
            config.stride_in_pixels,
            config.buffer_count,
            config.max_pending_swaps,
            config.multisample_mode
        );

        let mut allocator = DeviceAllocator::new();
        let mut parts = Parts::default();
        let built = build(&mut allocator, &mut driver, &config, &tracker, &mut parts);

        let error = match (built, parts) {
            (
                Ok(()),
                Parts {
                    context: Some(context),
                    render_target: Some(render_target),
                    chain: Some(chain),
                    depth: Some(depth),
                    patcher: Some(patcher),
                },
            ) => {
                return Ok(Self {
                    driver,
                    allocator,
                    config,
                    tracker,
                    context,
                    render_target,
                    chain,
                    depth,
                    patcher,
                });
            }
            (result, parts) => {
                parts.unwind(&mut allocator, &mut driver);
                result
                    .err()
                    .unwrap_or_else(|| GraphicsError::InvariantViolation("incomplete graphics init".into()))
            }
        };

        log::error!("graphics initialization failed: {error}");
        allocator.release_all(&mut driver);
        if let Err(err) = driver.terminate() {
            log::warn!("terminate after failed init: {err}");
        }
        Err(GraphicsFailure { driver, error })
    }

    /// Drains the GPU and the display queue, releases every resource and
    /// terminates the driver.
    ///
    /// Best effort: every step runs even if an earlier one failed; the first
    /// failure is reported along with the driver.
    pub fn shutdown(self) -> std::result::Result<D, GraphicsFailure<D>> {
        let Self {
            mut driver,
            mut allocator,
            context,
            render_target,
            mut chain,
            depth,
            mut patcher,
            ..
        } = self;
        let mut first_err: Option<GraphicsError> = None;
        let mut note = |err: GraphicsError| {
            log::warn!("shutdown: {err}");
            first_err.get_or_insert(err);
        };

        if let Err(err) = driver.finish(context.handle()) {
            note(err.into());
        }
        if let Err(err) = driver.display_queue_finish() {
            note(err.into());
        }

        depth.release(&mut allocator, &mut driver);
        chain.release(&mut allocator, &mut driver);

        if let Err(err) = patcher.unregister_all(&mut driver) {
            note(err);
        }
        if let Err(err) = patcher.destroy(&mut allocator, &mut driver) {
            note(err);
        }
        if let Err(err) = render_target.destroy(&mut driver) {
            note(err.into());
        }
        if let Err(err) = context.destroy(&mut allocator, &mut driver) {
            note(err.into());
        }

        let leftover = allocator.live_count();
        if leftover > 0 {
            log::warn!("shutdown: releasing {leftover} block(s) the application did not release");
            allocator.release_all(&mut driver);
        }

        if let Err(err) = driver.terminate() {
            note(err.into());
        }

        match first_err {
            None => {
                log::info!("graphics shut down");
                Ok(driver)
            }
            Some(error) => Err(GraphicsFailure { driver, error }),
        }
    }

    // ── frame cycle ──────────────────────────────────────────────────────

    pub fn start_scene(&mut self) -> Result<()> {
        self.chain.start_scene(
            &mut self.driver,
            self.context.handle(),
            self.render_target.handle(),
            self.depth.surface(),
        )
    }

    pub fn end_scene(&mut self) -> Result<()> {
        self.chain.end_scene(&mut self.driver, self.context.handle())
    }

    /// Queues the back buffer for display; blocks while the queue is full.
    pub fn swap_buffers(&mut self) -> Result<()> {
        self.chain.swap(&mut self.driver)
    }

    pub fn clear_screen(&mut self, color: u32) -> Result<()> {
        self.chain.clear(&mut self.driver, color)
    }

    pub fn clear_screen_default(&mut self) -> Result<()> {
        self.clear_screen(color::BLACK)
    }

    // ── draw state ───────────────────────────────────────────────────────

    pub fn set_vertex_program(&mut self, program: VertexProgramHandle) -> Result<()> {
        Ok(self.driver.set_vertex_program(self.context.handle(), program)?)
    }

    pub fn set_fragment_program(&mut self, program: FragmentProgramHandle) -> Result<()> {
        Ok(self.driver.set_fragment_program(self.context.handle(), program)?)
    }

    pub fn set_vertex_stream(&mut self, stream_index: u32, data: DeviceAddress) -> Result<()> {
        Ok(self.driver.set_vertex_stream(self.context.handle(), stream_index, data)?)
    }

    /// Writes `values` into the bound vertex program's default uniform buffer.
    pub fn set_vertex_program_constants(
        &mut self,
        parameter: &ProgramParameter,
        component_offset: u32,
        values: &[f32],
    ) -> Result<()> {
        let buffer = self.driver.reserve_vertex_default_uniform_buffer(self.context.handle())?;
        Ok(self.driver.set_uniform_data_f(buffer, parameter, component_offset, values)?)
    }

    pub fn draw(
        &mut self,
        primitive: PrimitiveType,
        index_format: IndexFormat,
        index_data: DeviceAddress,
        index_count: u32,
    ) -> Result<()> {
        Ok(self
            .driver
            .draw(self.context.handle(), primitive, index_format, index_data, index_count)?)
    }

    // ── shaders ──────────────────────────────────────────────────────────

    pub fn register_program(&mut self, binary: Arc<ShaderBinary>) -> Result<ProgramRegistration> {
        self.patcher.register_program(&mut self.driver, binary)
    }

    pub fn unregister_program(&mut self, registration: &ProgramRegistration) -> Result<()> {
        self.patcher.unregister_program(&mut self.driver, registration)
    }

    pub fn set_stream_type(&mut self, ty: VertexStreamType) -> VertexStream {
        self.patcher.set_stream_type(ty)
    }

    pub fn create_vertex_program(
        &mut self,
        registration: &ProgramRegistration,
        bindings: &[AttributeBinding<'_>],
    ) -> Result<VertexProgramHandle> {
        self.patcher.create_vertex_program(&mut self.driver, registration, bindings)
    }

    pub fn create_fragment_program(
        &mut self,
        registration: &ProgramRegistration,
        paired_vertex: Option<&ProgramRegistration>,
    ) -> Result<FragmentProgramHandle> {
        self.patcher.create_fragment_program(&mut self.driver, registration, paired_vertex)
    }

    pub fn release_vertex_program(&mut self, program: VertexProgramHandle) -> Result<()> {
        self.patcher.release_vertex_program(&mut self.driver, program)
    }

    pub fn release_fragment_program(&mut self, program: FragmentProgramHandle) -> Result<()> {
        self.patcher.release_fragment_program(&mut self.driver, program)
    }

    pub fn program_parameter(&self, registration: &ProgramRegistration, name: &str) -> Result<ProgramParameter> {
        self.patcher.program_parameter(&self.driver, registration, name)
    }

    // ── memory ───────────────────────────────────────────────────────────

    pub fn allocate(
        &mut self,
        kind: MemBlockKind,
        size: u32,
        alignment: u32,
        attribs: MemoryAttribs,
    ) -> Result<MemoryBlock> {
        Ok(self.allocator.allocate(&mut self.driver, kind, size, alignment, attribs)?)
    }

    /// Releases a block from [`allocate`](Self::allocate). Unknown ids are ignored.
    pub fn release(&mut self, block: BlockId) -> bool {
        self.allocator.release(&mut self.driver, block)
    }

    /// Copies `data` into mapped memory at `address`.
    pub fn write<T: Pod>(&mut self, address: DeviceAddress, data: &[T]) -> Result<()> {
        Ok(self.driver.write_memory(address, bytemuck::cast_slice(data))?)
    }

    // ── inspection ───────────────────────────────────────────────────────

    #[inline]
    pub fn config(&self) -> &GraphicsInit {
        &self.config
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[inline]
    pub fn front_buffer_index(&self) -> usize {
        self.chain.front_index()
    }

    #[inline]
    pub fn back_buffer_index(&self) -> usize {
        self.chain.back_index()
    }

    pub fn buffer_state(&self, index: usize) -> Option<BufferState> {
        self.chain.state(index)
    }

    pub fn display_chain(&self) -> &DisplayChain {
        &self.chain
    }

    pub fn patcher(&self) -> &ShaderPatcher {
        &self.patcher
    }

    pub fn depth_stencil(&self) -> &DepthStencilBuffer {
        &self.depth
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    /// Frames the display callback has handed to the display.
    pub fn presented_count(&self) -> u64 {
        self.tracker.presented_count()
    }

    /// Blocks currently held by the allocator, including the core's own.
    pub fn live_block_count(&self) -> usize {
        self.allocator.live_count()
    }
}

fn build<D: GpuDriver>(
    allocator: &mut DeviceAllocator,
    driver: &mut D,
    config: &GraphicsInit,
    tracker: &PresentTracker,
    parts: &mut Parts,
) -> Result<()> {
    parts.context = Some(GraphicsContext::create(
        allocator,
        driver,
        &config.ring_buffers,
        config.vertex_usse_ring_buffer,
    )?);

    parts.render_target = Some(RenderTarget::create(
        driver,
        config.width,
        config.height,
        config.multisample_mode,
        config.scenes_per_frame,
    )?);

    parts.chain = Some(DisplayChain::allocate(allocator, driver, config, tracker.clone())?);

    parts.depth = Some(DepthStencilBuffer::allocate(
        allocator,
        driver,
        config.width,
        config.height,
        config.multisample_mode,
    )?);

    parts.patcher = Some(ShaderPatcher::create(
        allocator,
        driver,
        &config.patcher,
        config.output_register_format,
        config.multisample_mode,
    )?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{code, HeadlessDisplay, HeadlessDriver};
    use std::time::Duration;

    fn display() -> Arc<HeadlessDisplay> {
        Arc::new(HeadlessDisplay::new(Duration::ZERO))
    }

    #[test]
    fn init_runs_the_driver_sequence_in_order() {
        let gfx = Graphics::init(HeadlessDriver::new(), display(), GraphicsInit::default()).unwrap();
        let calls = gfx.driver().calls();
        let position = |name: &str| calls.iter().position(|c| *c == name).unwrap();

        assert!(position("initialize") < position("create_context"));
        assert!(position("create_context") < position("create_render_target"));
        assert!(position("create_render_target") < position("color_surface_init"));
        assert!(position("color_surface_init") < position("depth_stencil_surface_init"));
        assert!(position("depth_stencil_surface_init") < position("shader_patcher_create"));

        let driver = gfx.shutdown().unwrap();
        assert_eq!(driver.live_block_count(), 0);
    }

    #[test]
    fn invalid_config_never_touches_the_driver() {
        let config = GraphicsInit {
            buffer_count: 0,
            ..GraphicsInit::default()
        };
        let failure = Graphics::init(HeadlessDriver::new(), display(), config).unwrap_err();
        assert!(matches!(failure.error, GraphicsError::InvalidConfig(_)));
        assert!(failure.driver.calls().is_empty());
    }

    #[test]
    fn failure_at_each_step_unwinds_cleanly() {
        for op in [
            "create_render_target",
            "color_surface_init",
            "sync_object_create",
            "depth_stencil_surface_init",
            "shader_patcher_create",
        ] {
            let mut driver = HeadlessDriver::new();
            driver.fail_next(op, code::OUT_OF_MEMORY);

            let failure = Graphics::init(driver, display(), GraphicsInit::default()).unwrap_err();
            assert!(matches!(failure.error, GraphicsError::Driver(e) if e.operation == op), "{op}");
            assert_eq!(failure.driver.live_block_count(), 0, "{op}");
            assert_eq!(failure.driver.live_object_count(), 0, "{op}");
            assert!(!failure.driver.is_initialized(), "{op}");
        }
    }

    #[test]
    fn user_allocations_are_tracked() {
        let mut gfx = Graphics::init(HeadlessDriver::new(), display(), GraphicsInit::default()).unwrap();
        let before = gfx.live_block_count();

        let block = gfx
            .allocate(MemBlockKind::UserRwUncache, 256, 4, MemoryAttribs::READ)
            .unwrap();
        gfx.write(block.base(), &[1u16, 2, 3]).unwrap();
        assert_eq!(gfx.driver().read_memory(block.base(), 6), Some(vec![1, 0, 2, 0, 3, 0]));
        assert_eq!(gfx.live_block_count(), before + 1);

        assert!(gfx.release(block.id()));
        assert!(!gfx.release(block.id()));
        gfx.shutdown().unwrap();
    }

    #[test]
    fn clear_screen_default_is_black() {
        let mut gfx = Graphics::init(HeadlessDriver::new(), display(), GraphicsInit::default()).unwrap();
        gfx.clear_screen_default().unwrap();

        let base = gfx.display_chain().buffers()[2].block().base();
        assert_eq!(gfx.driver().read_memory(base, 4), Some(color::BLACK.to_le_bytes().to_vec()));
        gfx.shutdown().unwrap();
    }
}
