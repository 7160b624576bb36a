use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::driver::{DeviceAddress, DisplayCallback, DisplayData, DriverError, FrameBuf, PixelFormat, SetBufMode};

/// OS display service: scans out a frame buffer and reports vblank.
pub trait DisplayService: Send + Sync {
    fn set_frame_buf(&self, frame: &FrameBuf, mode: SetBufMode) -> Result<(), DriverError>;
    /// Blocks until the start of the next vertical blank.
    fn wait_vblank_start(&self) -> Result<(), DriverError>;
}

/// Scan-out geometry shared by every display buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub stride_in_pixels: u32,
    pub pixel_format: PixelFormat,
}

/// Records which buffer the display callback handed over last.
///
/// Written from the driver's queue thread, read from the render thread.
#[derive(Debug, Clone, Default)]
pub struct PresentTracker {
    inner: Arc<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    last: AtomicU64,
    count: AtomicU64,
}

impl PresentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, address: DeviceAddress) {
        self.inner.last.store(address.0, Ordering::Release);
        self.inner.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn last_presented(&self) -> Option<DeviceAddress> {
        match self.inner.last.load(Ordering::Acquire) {
            0 => None,
            addr => Some(DeviceAddress(addr)),
        }
    }

    pub fn presented_count(&self) -> u64 {
        self.inner.count.load(Ordering::Acquire)
    }
}

/// Builds the display-queue callback.
///
/// Each invocation points the display at the queued buffer for the next
/// vsync, then waits for vblank so the driver cannot start another flip until
/// this one is visible. Display-service failures are logged; the callback
/// runs on the driver thread and has no caller to report to.
pub fn present_callback(
    display: Arc<dyn DisplayService>,
    geometry: DisplayGeometry,
    tracker: PresentTracker,
) -> DisplayCallback {
    Arc::new(move |data: &DisplayData| {
        let frame = FrameBuf {
            base: data.address,
            pitch: geometry.stride_in_pixels,
            pixel_format: geometry.pixel_format,
            width: geometry.width,
            height: geometry.height,
        };

        if let Err(err) = display.set_frame_buf(&frame, SetBufMode::NextFrame) {
            log::error!("set_frame_buf({}) failed: {err}", data.address);
            return;
        }
        tracker.record(data.address);

        if let Err(err) = display.wait_vblank_start() {
            log::warn!("wait_vblank_start failed: {err}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::HeadlessDisplay;
    use std::time::Duration;

    fn geometry() -> DisplayGeometry {
        DisplayGeometry {
            width: 960,
            height: 544,
            stride_in_pixels: 1024,
            pixel_format: PixelFormat::A8B8G8R8,
        }
    }

    #[test]
    fn callback_sets_next_frame_and_waits_for_vblank() {
        let display = Arc::new(HeadlessDisplay::new(Duration::ZERO));
        let tracker = PresentTracker::new();
        let cb = present_callback(display.clone(), geometry(), tracker.clone());

        cb(&DisplayData { address: DeviceAddress(0x6000_0000) });

        let frames = display.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].base, DeviceAddress(0x6000_0000));
        assert_eq!(frames[0].pitch, 1024);
        assert_eq!(display.vblank_waits(), 1);
        assert_eq!(tracker.last_presented(), Some(DeviceAddress(0x6000_0000)));
        assert_eq!(tracker.presented_count(), 1);
    }

    #[test]
    fn tracker_starts_empty() {
        let tracker = PresentTracker::new();
        assert_eq!(tracker.last_presented(), None);
        assert_eq!(tracker.presented_count(), 0);
    }
}
