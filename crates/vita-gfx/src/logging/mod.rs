//! Logging utilities.
//!
//! Centralizes logger initialization. Library code only uses the `log`
//! facade; the backend is chosen here.

mod init;

pub use init::{init_logging, LoggingConfig};
