use std::sync::Arc;

use crate::driver::{DisplayData, GpuDriver, HeadlessDriver, InitializeParams};

/// Headless driver with a no-op display callback, already initialized.
pub(crate) fn initialized_driver() -> HeadlessDriver {
    let mut driver = HeadlessDriver::new();
    driver
        .initialize(InitializeParams {
            flags: 0,
            display_queue_max_pending_count: 2,
            display_queue_callback: Arc::new(|_: &DisplayData| {}),
            parameter_buffer_size: 16 * 1024 * 1024,
        })
        .expect("headless initialize");
    driver
}
