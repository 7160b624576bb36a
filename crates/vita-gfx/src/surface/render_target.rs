use crate::driver::{DriverError, GpuDriver, MultisampleMode, RenderTargetHandle, RenderTargetParams};

/// Output geometry scenes are scheduled against.
#[derive(Debug)]
pub struct RenderTarget {
    handle: RenderTargetHandle,
    params: RenderTargetParams,
}

impl RenderTarget {
    pub fn create<D: GpuDriver + ?Sized>(
        driver: &mut D,
        width: u32,
        height: u32,
        multisample_mode: MultisampleMode,
        scenes_per_frame: u32,
    ) -> Result<Self, DriverError> {
        let params = RenderTargetParams {
            flags: 0,
            width,
            height,
            scenes_per_frame,
            multisample_mode,
            multisample_locations: 0,
            driver_mem_block: None,
        };

        log::debug!("creating render target {width}x{height} ({multisample_mode:?}, {scenes_per_frame} scene/frame)");
        let handle = driver.create_render_target(&params)?;
        log::debug!("render target created: {handle}");
        Ok(Self { handle, params })
    }

    #[inline]
    pub fn handle(&self) -> RenderTargetHandle {
        self.handle
    }

    #[inline]
    pub fn params(&self) -> &RenderTargetParams {
        &self.params
    }

    pub fn destroy<D: GpuDriver + ?Sized>(self, driver: &mut D) -> Result<(), DriverError> {
        log::debug!("destroying render target {}", self.handle);
        driver.destroy_render_target(self.handle)
    }
}
