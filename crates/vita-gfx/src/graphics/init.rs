use crate::context::RingBufferSizes;
use crate::display::DisplayGeometry;
use crate::driver::{ColorFormat, MultisampleMode, OutputRegisterFormat, PixelFormat};
use crate::error::GraphicsError;
use crate::memory::align_up;
use crate::shader::PatcherSizes;

pub const DISPLAY_WIDTH: u32 = 960;
pub const DISPLAY_HEIGHT: u32 = 544;
pub const DISPLAY_STRIDE_IN_PIXELS: u32 = 1024;
pub const DISPLAY_BUFFER_COUNT: usize = 3;
pub const DISPLAY_MAX_PENDING_SWAPS: u32 = 2;

/// Driver parameter buffer size used when none is configured.
pub const DEFAULT_PARAMETER_BUFFER_SIZE: u32 = 16 * 1024 * 1024;

/// Color written into freshly allocated display buffers so unrendered
/// regions stand out.
pub const DEBUG_FILL_COLOR: u32 = 0xffff_00ff;

/// Display buffers are sized in whole megabytes.
const DISPLAY_BUFFER_GRANULE: u32 = 1024 * 1024;

/// Initialization parameters for [`Graphics`](super::Graphics).
#[derive(Debug, Clone)]
pub struct GraphicsInit {
    /// Visible resolution in pixels.
    pub width: u32,
    pub height: u32,

    /// Row pitch of each display buffer. Must be at least `width`.
    pub stride_in_pixels: u32,

    pub color_format: ColorFormat,

    /// Format handed to the display service. Must match `color_format`.
    pub pixel_format: PixelFormat,

    /// Number of display buffers in the chain.
    pub buffer_count: usize,

    /// Flips allowed in flight before `swap_buffers` blocks.
    pub max_pending_swaps: u32,

    /// Applied to the render target, the surfaces and every fragment program.
    pub multisample_mode: MultisampleMode,

    pub scenes_per_frame: u32,

    /// Driver-internal parameter buffer, in bytes.
    pub parameter_buffer_size: u32,

    pub ring_buffers: RingBufferSizes,

    /// Allocate a dedicated vertex USSE ring instead of the driver default.
    pub vertex_usse_ring_buffer: bool,

    pub patcher: PatcherSizes,

    pub output_register_format: OutputRegisterFormat,

    /// Fill pattern for new display buffers; `None` leaves them zeroed.
    pub debug_fill_color: Option<u32>,
}

impl Default for GraphicsInit {
    fn default() -> Self {
        Self {
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            stride_in_pixels: DISPLAY_STRIDE_IN_PIXELS,
            color_format: ColorFormat::A8B8G8R8,
            pixel_format: PixelFormat::A8B8G8R8,
            buffer_count: DISPLAY_BUFFER_COUNT,
            max_pending_swaps: DISPLAY_MAX_PENDING_SWAPS,
            multisample_mode: MultisampleMode::None,
            scenes_per_frame: 1,
            parameter_buffer_size: DEFAULT_PARAMETER_BUFFER_SIZE,
            ring_buffers: RingBufferSizes::default(),
            vertex_usse_ring_buffer: false,
            patcher: PatcherSizes::default(),
            output_register_format: OutputRegisterFormat::Uchar4,
            debug_fill_color: Some(DEBUG_FILL_COLOR),
        }
    }
}

impl GraphicsInit {
    pub fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry {
            width: self.width,
            height: self.height,
            stride_in_pixels: self.stride_in_pixels,
            pixel_format: self.pixel_format,
        }
    }

    /// Bytes requested for one display buffer.
    pub fn display_buffer_size(&self) -> Option<u32> {
        let bytes = self
            .stride_in_pixels
            .checked_mul(self.height)?
            .checked_mul(self.color_format.bytes_per_pixel())?;
        align_up(bytes, DISPLAY_BUFFER_GRANULE)
    }

    /// Rejects configurations the driver would refuse halfway through init.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let invalid = |msg: String| Err(GraphicsError::InvalidConfig(msg));

        if self.width == 0 || self.height == 0 {
            return invalid(format!("zero-sized display {}x{}", self.width, self.height));
        }
        if self.stride_in_pixels < self.width {
            return invalid(format!("stride {} is narrower than width {}", self.stride_in_pixels, self.width));
        }
        if self.buffer_count == 0 {
            return invalid("at least one display buffer is required".into());
        }
        if self.max_pending_swaps == 0 {
            return invalid("max_pending_swaps must be at least 1".into());
        }
        if self.scenes_per_frame == 0 {
            return invalid("scenes_per_frame must be at least 1".into());
        }
        if self.display_buffer_size().is_none() {
            return invalid(format!("{}x{} display buffer overflows", self.stride_in_pixels, self.height));
        }
        Ok(())
    }
}
