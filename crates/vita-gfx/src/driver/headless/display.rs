use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::display::DisplayService;
use crate::driver::{code, DriverError, FrameBuf, SetBufMode};

/// Display service that records every frame buffer it is asked to show.
///
/// `vblank` is how long [`wait_vblank_start`](DisplayService::wait_vblank_start)
/// sleeps; zero makes presentation free-running.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    vblank: Duration,
    frames: Mutex<Vec<FrameBuf>>,
    vblank_waits: AtomicU64,
}

impl HeadlessDisplay {
    pub fn new(vblank: Duration) -> Self {
        Self {
            vblank,
            ..Self::default()
        }
    }

    /// Frames in the order they were set.
    pub fn frames(&self) -> Vec<FrameBuf> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn vblank_waits(&self) -> u64 {
        self.vblank_waits.load(Ordering::Acquire)
    }
}

impl DisplayService for HeadlessDisplay {
    fn set_frame_buf(&self, frame: &FrameBuf, mode: SetBufMode) -> Result<(), DriverError> {
        if frame.base.is_null() || frame.pitch < frame.width {
            return Err(DriverError::new("set_frame_buf", code::INVALID_VALUE));
        }
        log::trace!("scan-out {} ({mode:?})", frame.base);
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).push(*frame);
        Ok(())
    }

    fn wait_vblank_start(&self) -> Result<(), DriverError> {
        if !self.vblank.is_zero() {
            thread::sleep(self.vblank);
        }
        self.vblank_waits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
