use crate::driver::{
    DepthStencilFormat, DepthStencilSurface, DepthStencilSurfaceType, GpuDriver, MemBlockKind,
    MemoryAttribs, MultisampleMode,
};
use crate::error::GraphicsError;
use crate::memory::{align_up, DeviceAllocator, MemoryBlock};

use super::{DEPTHSTENCIL_SURFACE_ALIGNMENT, TILE_SIZE_X, TILE_SIZE_Y};

/// Sizing of the depth/stencil surface for a given resolution and MSAA mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DepthStencilLayout {
    pub aligned_width: u32,
    pub aligned_height: u32,
    pub sample_count: u32,
    pub stride_in_samples: u32,
}

impl DepthStencilLayout {
    /// Fails with [`GraphicsError::InvalidConfig`] when the surface would not
    /// fit a 32-bit byte size.
    pub fn new(width: u32, height: u32, multisample_mode: MultisampleMode) -> Result<Self, GraphicsError> {
        let (sample_factor, stride_factor) = multisample_mode.depth_factors();
        let too_large =
            || GraphicsError::InvalidConfig(format!("{width}x{height} depth/stencil surface ({multisample_mode:?}) is too large"));

        let aligned_width = align_up(width, TILE_SIZE_X).ok_or_else(too_large)?;
        let aligned_height = align_up(height, TILE_SIZE_Y).ok_or_else(too_large)?;
        let sample_count = aligned_width
            .checked_mul(aligned_height)
            .and_then(|n| n.checked_mul(sample_factor))
            .filter(|n| n.checked_mul(4).is_some())
            .ok_or_else(too_large)?;
        let stride_in_samples = aligned_width.checked_mul(stride_factor).ok_or_else(too_large)?;

        Ok(Self {
            aligned_width,
            aligned_height,
            sample_count,
            stride_in_samples,
        })
    }

    /// Bytes of D24S8 storage: four per sample.
    #[inline]
    pub fn byte_size(&self) -> u32 {
        self.sample_count * 4
    }
}

/// The shared depth/stencil surface and its backing memory.
///
/// Never force-loaded or stored, so the GPU does not actually touch it
/// for a back-to-front single-pass workload.
#[derive(Debug)]
pub struct DepthStencilBuffer {
    block: MemoryBlock,
    surface: DepthStencilSurface,
    layout: DepthStencilLayout,
}

impl DepthStencilBuffer {
    pub fn allocate<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        width: u32,
        height: u32,
        multisample_mode: MultisampleMode,
    ) -> Result<Self, GraphicsError> {
        let layout = DepthStencilLayout::new(width, height, multisample_mode)?;
        log::debug!(
            "depth/stencil: {}x{} tiles-aligned, {} samples, stride {} ({multisample_mode:?})",
            layout.aligned_width,
            layout.aligned_height,
            layout.sample_count,
            layout.stride_in_samples
        );

        let block = allocator.allocate(
            driver,
            MemBlockKind::UserRwUncache,
            layout.byte_size(),
            DEPTHSTENCIL_SURFACE_ALIGNMENT,
            MemoryAttribs::RW,
        )?;

        let surface = DepthStencilSurface {
            format: DepthStencilFormat::S8D24,
            surface_type: DepthStencilSurfaceType::Tiled,
            stride_in_samples: layout.stride_in_samples,
            depth_data: block.base(),
            stencil_data: None,
        };
        if let Err(err) = driver.depth_stencil_surface_init(&surface) {
            allocator.release(driver, block.id());
            return Err(err.into());
        }

        Ok(Self { block, surface, layout })
    }

    #[inline]
    pub fn surface(&self) -> &DepthStencilSurface {
        &self.surface
    }

    #[inline]
    pub fn layout(&self) -> DepthStencilLayout {
        self.layout
    }

    #[inline]
    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }

    pub fn release<D: GpuDriver + ?Sized>(self, allocator: &mut DeviceAllocator, driver: &mut D) {
        allocator.release(driver, self.block.id());
    }
}
