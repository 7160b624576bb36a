//! Display buffers, the bounded presentation queue and the callback that
//! hands finished buffers to the OS display service.

mod chain;
mod queue;
mod service;

pub use chain::{BufferState, DisplayBuffer, DisplayChain};
pub use queue::{DisplayQueue, QueueClosed};
pub use service::{present_callback, DisplayGeometry, DisplayService, PresentTracker};
