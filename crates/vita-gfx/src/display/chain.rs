use crate::driver::{
    ColorSurface, ColorSurfaceType, ContextHandle, DepthStencilSurface, DisplayData, GpuDriver,
    MemBlockKind, MemoryAttribs, OutputRegisterSize, RenderTargetHandle, SyncObjectHandle,
};
use crate::error::{GraphicsError, Result};
use crate::graphics::GraphicsInit;
use crate::memory::{DeviceAllocator, MemoryBlock};
use crate::surface::COLOR_SURFACE_ALIGNMENT;

use super::PresentTracker;

/// Where a display buffer is in its render/present cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferState {
    Idle,
    Rendering,
    Queued,
    Presented,
}

/// One buffer of the chain: video memory, its color surface and its fence.
#[derive(Debug)]
pub struct DisplayBuffer {
    block: MemoryBlock,
    surface: ColorSurface,
    sync: SyncObjectHandle,
    state: BufferState,
}

impl DisplayBuffer {
    #[inline]
    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    #[inline]
    pub fn surface(&self) -> &ColorSurface {
        &self.surface
    }

    #[inline]
    pub fn sync(&self) -> SyncObjectHandle {
        self.sync
    }
}

/// The ring of display buffers with its front/back indices.
///
/// `front` is the buffer most recently handed to the display queue, `back`
/// the one scenes render into. Both start at zero; every swap queues the back
/// buffer, makes it the front and advances `back` by one.
#[derive(Debug)]
pub struct DisplayChain {
    buffers: Vec<DisplayBuffer>,
    front: usize,
    back: usize,
    tracker: PresentTracker,
}

impl DisplayChain {
    /// Allocates `init.buffer_count` buffers.
    ///
    /// Each buffer's color surface is initialized before its sync object is
    /// created. On failure every buffer already built is released.
    pub fn allocate<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        init: &GraphicsInit,
        tracker: PresentTracker,
    ) -> Result<Self> {
        let mut chain = Self {
            buffers: Vec::with_capacity(init.buffer_count),
            front: 0,
            back: 0,
            tracker,
        };

        for index in 0..init.buffer_count {
            match allocate_buffer(allocator, driver, init) {
                Ok(buffer) => {
                    log::debug!(
                        "display buffer {index}: {} at {} ({})",
                        buffer.block.id(),
                        buffer.block.base(),
                        buffer.sync
                    );
                    chain.buffers.push(buffer);
                }
                Err(err) => {
                    log::error!("display buffer {index} allocation failed: {err}");
                    chain.release(allocator, driver);
                    return Err(err);
                }
            }
        }
        Ok(chain)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn front_index(&self) -> usize {
        self.front
    }

    #[inline]
    pub fn back_index(&self) -> usize {
        self.back
    }

    pub fn buffers(&self) -> &[DisplayBuffer] {
        &self.buffers
    }

    /// State of buffer `index`, or `None` if out of range.
    ///
    /// A queued buffer becomes `Presented` once the display callback has
    /// handed it to the display.
    pub fn state(&self, index: usize) -> Option<BufferState> {
        let buffer = self.buffers.get(index)?;
        let presented = self.tracker.last_presented() == Some(buffer.block.base());
        Some(match buffer.state {
            BufferState::Queued if presented => BufferState::Presented,
            state => state,
        })
    }

    /// Begins a scene on the back buffer.
    pub fn start_scene<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        context: ContextHandle,
        target: RenderTargetHandle,
        depth: &DepthStencilSurface,
    ) -> Result<()> {
        let back = self.back_buffer_mut()?;
        driver.begin_scene(context, target, back.sync, &back.surface, depth)?;
        back.state = BufferState::Rendering;
        Ok(())
    }

    /// Ends the current scene and signals the back buffer's fence.
    pub fn end_scene<D: GpuDriver + ?Sized>(&mut self, driver: &mut D, context: ContextHandle) -> Result<()> {
        driver.end_scene(context)?;
        let back = self.back_buffer_mut()?;
        driver.pad_heartbeat(&back.surface, back.sync)?;
        Ok(())
    }

    /// Queues the back buffer for display and advances the indices.
    ///
    /// Blocks inside the driver while the maximum number of flips is pending.
    pub fn swap<D: GpuDriver + ?Sized>(&mut self, driver: &mut D) -> Result<()> {
        let count = self.buffers.len();
        if count == 0 {
            return Err(GraphicsError::InvariantViolation("swap on an empty display chain".into()));
        }

        let old_sync = self.buffers[self.front].sync;
        let new_sync = self.buffers[self.back].sync;
        let data = DisplayData {
            address: self.buffers[self.back].block.base(),
        };
        driver.display_queue_add_entry(old_sync, new_sync, data)?;

        if self.front != self.back {
            self.buffers[self.front].state = BufferState::Idle;
        }
        self.buffers[self.back].state = BufferState::Queued;
        self.front = self.back;
        self.back = (self.back + 1) % count;
        log::trace!("swap: front={} back={}", self.front, self.back);
        Ok(())
    }

    /// Fills the visible rows of every buffer with `color`.
    pub fn clear<D: GpuDriver + ?Sized>(&self, driver: &mut D, color: u32) -> Result<()> {
        for buffer in &self.buffers {
            fill_visible(driver, &buffer.surface, color)?;
        }
        Ok(())
    }

    /// Zeroes and frees every buffer, then destroys its sync object.
    ///
    /// Best effort: failures are logged and the remaining buffers are still
    /// released. The display queue must be drained first.
    pub fn release<D: GpuDriver + ?Sized>(&mut self, allocator: &mut DeviceAllocator, driver: &mut D) {
        for buffer in self.buffers.drain(..) {
            let bytes = buffer.surface.stride_in_pixels * buffer.surface.height * buffer.surface.format.bytes_per_pixel();
            if let Err(err) = driver.fill_memory(buffer.block.base(), bytes, 0) {
                log::warn!("zeroing display buffer {} failed: {err}", buffer.block.id());
            }
            allocator.release(driver, buffer.block.id());
            if let Err(err) = driver.sync_object_destroy(buffer.sync) {
                log::warn!("destroying {} failed: {err}", buffer.sync);
            }
        }
        self.front = 0;
        self.back = 0;
    }

    fn back_buffer_mut(&mut self) -> Result<&mut DisplayBuffer> {
        self.buffers
            .get_mut(self.back)
            .ok_or_else(|| GraphicsError::InvariantViolation("display chain has no back buffer".into()))
    }
}

fn allocate_buffer<D: GpuDriver + ?Sized>(
    allocator: &mut DeviceAllocator,
    driver: &mut D,
    init: &GraphicsInit,
) -> Result<DisplayBuffer> {
    let size = init
        .display_buffer_size()
        .ok_or_else(|| GraphicsError::InvalidConfig("display buffer size overflows".into()))?;
    let block = allocator.allocate(
        driver,
        MemBlockKind::UserCdramRw,
        size,
        COLOR_SURFACE_ALIGNMENT,
        MemoryAttribs::RW,
    )?;

    let surface = ColorSurface {
        format: init.color_format,
        surface_type: ColorSurfaceType::Linear,
        scale: init.multisample_mode.color_scale(),
        output_register_size: OutputRegisterSize::Bits32,
        width: init.width,
        height: init.height,
        stride_in_pixels: init.stride_in_pixels,
        data: block.base(),
    };

    match init_buffer(driver, init, &surface) {
        Ok(sync) => Ok(DisplayBuffer {
            block,
            surface,
            sync,
            state: BufferState::Idle,
        }),
        Err(err) => {
            allocator.release(driver, block.id());
            Err(err)
        }
    }
}

/// Debug fill, then the color surface, then the fence.
fn init_buffer<D: GpuDriver + ?Sized>(
    driver: &mut D,
    init: &GraphicsInit,
    surface: &ColorSurface,
) -> Result<SyncObjectHandle> {
    if let Some(color) = init.debug_fill_color {
        fill_visible(driver, surface, color)?;
    }
    driver.color_surface_init(surface)?;
    Ok(driver.sync_object_create()?)
}

fn fill_visible<D: GpuDriver + ?Sized>(driver: &mut D, surface: &ColorSurface, color: u32) -> Result<()> {
    let bpp = surface.format.bytes_per_pixel();
    let pitch = u64::from(surface.stride_in_pixels * bpp);
    for row in 0..u64::from(surface.height) {
        driver.fill_memory(surface.data.offset(row * pitch), surface.width * bpp, color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color;
    use crate::driver::{code, HeadlessDriver};
    use crate::surface::DepthStencilBuffer;
    use crate::test_support::initialized_driver;

    fn small_init(buffer_count: usize) -> GraphicsInit {
        GraphicsInit {
            width: 64,
            height: 32,
            stride_in_pixels: 64,
            buffer_count,
            ..GraphicsInit::default()
        }
    }

    fn chain(driver: &mut HeadlessDriver, alloc: &mut DeviceAllocator, count: usize) -> DisplayChain {
        DisplayChain::allocate(alloc, driver, &small_init(count), PresentTracker::new()).unwrap()
    }

    // ── allocation ────────────────────────────────────────────────────────

    #[test]
    fn buffers_start_idle_with_debug_fill() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let mut c = chain(&mut driver, &mut alloc, 3);

        assert_eq!(c.len(), 3);
        assert_eq!((c.front_index(), c.back_index()), (0, 0));
        for i in 0..3 {
            assert_eq!(c.state(i), Some(BufferState::Idle));
        }
        let first = driver.read_memory(c.buffers()[0].block().base(), 4).unwrap();
        assert_eq!(u32::from_le_bytes(first.try_into().unwrap()), 0xffff_00ff);

        c.release(&mut alloc, &mut driver);
        assert_eq!(driver.live_block_count(), 0);
        assert_eq!(driver.live_object_count(), 0);
    }

    #[test]
    fn surface_is_initialized_before_its_sync_object() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let mut c = chain(&mut driver, &mut alloc, 2);

        let calls: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|name| *name == "color_surface_init" || *name == "sync_object_create")
            .collect();
        assert_eq!(
            calls,
            ["color_surface_init", "sync_object_create", "color_surface_init", "sync_object_create"]
        );
        c.release(&mut alloc, &mut driver);
    }

    #[test]
    fn failure_midway_releases_earlier_buffers() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        driver.fail_after("sync_object_create", 1, code::OUT_OF_MEMORY);

        let err = DisplayChain::allocate(&mut alloc, &mut driver, &small_init(3), PresentTracker::new()).unwrap_err();
        assert!(matches!(err, GraphicsError::Driver(e) if e.operation == "sync_object_create"));
        assert_eq!(driver.live_block_count(), 0);
        assert_eq!(driver.live_object_count(), 0);
    }

    // ── swapping ──────────────────────────────────────────────────────────

    #[test]
    fn back_advances_by_one_and_front_follows() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut c = chain(&mut driver, &mut alloc, 3);

        for n in 1..=10 {
            let back_before = c.back_index();
            c.swap(&mut driver).unwrap();
            assert_eq!(c.front_index(), back_before);
            assert_eq!(c.back_index(), (back_before + 1) % 3);
            assert_ne!(c.front_index(), c.back_index(), "swap {n}");
        }

        driver.display_queue_finish().unwrap();
        c.release(&mut alloc, &mut driver);
        driver.terminate().unwrap();
    }

    #[test]
    fn single_buffer_swaps_onto_itself() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut c = chain(&mut driver, &mut alloc, 1);

        c.swap(&mut driver).unwrap();
        assert_eq!((c.front_index(), c.back_index()), (0, 0));

        driver.display_queue_finish().unwrap();
        c.release(&mut alloc, &mut driver);
        driver.terminate().unwrap();
    }

    #[test]
    fn scene_and_swap_walk_the_states() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let init = small_init(3);
        let tracker = PresentTracker::new();
        let mut c = DisplayChain::allocate(&mut alloc, &mut driver, &init, tracker.clone()).unwrap();
        let depth = DepthStencilBuffer::allocate(&mut alloc, &mut driver, init.width, init.height, init.multisample_mode).unwrap();
        let ctx = crate::context::GraphicsContext::create(&mut alloc, &mut driver, &init.ring_buffers, false).unwrap();
        let rt = crate::surface::RenderTarget::create(&mut driver, init.width, init.height, init.multisample_mode, 1).unwrap();

        c.start_scene(&mut driver, ctx.handle(), rt.handle(), depth.surface()).unwrap();
        assert_eq!(c.state(0), Some(BufferState::Rendering));
        c.end_scene(&mut driver, ctx.handle()).unwrap();
        c.swap(&mut driver).unwrap();
        assert!(matches!(c.state(0), Some(BufferState::Queued | BufferState::Presented)));

        // The queue callback here is a no-op, so nothing is ever recorded as shown.
        tracker.record(c.buffers()[0].block().base());
        assert_eq!(c.state(0), Some(BufferState::Presented));
        assert_eq!(driver.stats().heartbeats, 1);

        driver.display_queue_finish().unwrap();
        rt.destroy(&mut driver).unwrap();
        ctx.destroy(&mut alloc, &mut driver).unwrap();
        depth.release(&mut alloc, &mut driver);
        c.release(&mut alloc, &mut driver);
        assert_eq!(driver.live_block_count(), 0);
        driver.terminate().unwrap();
    }

    #[test]
    fn clear_fills_visible_rows_only() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let init = GraphicsInit {
            width: 4,
            height: 2,
            stride_in_pixels: 8,
            debug_fill_color: None,
            ..GraphicsInit::default()
        };
        let mut c = DisplayChain::allocate(&mut alloc, &mut driver, &init, PresentTracker::new()).unwrap();
        c.clear(&mut driver, color::RED).unwrap();

        let base = c.buffers()[1].block().base();
        let row = driver.read_memory(base, 8 * 4).unwrap();
        let pixels: Vec<u32> = row.chunks(4).map(|p| u32::from_le_bytes(p.try_into().unwrap())).collect();
        assert_eq!(pixels, [color::RED, color::RED, color::RED, color::RED, 0, 0, 0, 0]);

        c.release(&mut alloc, &mut driver);
    }
}
