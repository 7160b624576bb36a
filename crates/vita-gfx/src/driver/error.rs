use std::fmt;

/// Failure reported by a native driver entry point.
///
/// `operation` names the entry point that failed; `code` is the raw status
/// value it returned. Callers decide whether the failure is fatal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub struct DriverError {
    pub operation: &'static str,
    pub code: i32,
}

impl DriverError {
    #[inline]
    pub const fn new(operation: &'static str, code: i32) -> Self {
        Self { operation, code }
    }

    /// Returns `true` if the driver rejected the call because it was already initialized.
    #[inline]
    pub fn is_already_initialized(&self) -> bool {
        self.code == code::ALREADY_INITIALIZED
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with 0x{:08X}", self.operation, self.code as u32)
    }
}

/// Status codes returned by driver entry points.
///
/// Values follow the console's `0x80xxxxxx` error-code layout so that log
/// output can be matched against the vendor error tables.
pub mod code {
    const fn err(raw: u32) -> i32 {
        raw as i32
    }

    pub const UNINITIALIZED: i32 = err(0x805B_0000);
    pub const ALREADY_INITIALIZED: i32 = err(0x805B_0001);
    pub const OUT_OF_MEMORY: i32 = err(0x805B_0002);
    pub const INVALID_VALUE: i32 = err(0x805B_0003);
    pub const INVALID_POINTER: i32 = err(0x805B_0004);
    pub const INVALID_ALIGNMENT: i32 = err(0x805B_0005);
    pub const NOT_WITHIN_SCENE: i32 = err(0x805B_0006);
    pub const WITHIN_SCENE: i32 = err(0x805B_0007);
    pub const NULL_PROGRAM: i32 = err(0x805B_0008);
    pub const PROGRAM_IN_USE: i32 = err(0x805B_000E);
    pub const INVALID_PROGRAM: i32 = err(0x805B_0011);
    pub const DRIVER: i32 = err(0x805B_0017);

    pub const INVALID_UID: i32 = err(0x8002_0000);
    pub const MEMORY_STILL_MAPPED: i32 = err(0x8002_0001);
    pub const MEMORY_IN_USE_BY_DISPLAY: i32 = err(0x8002_0002);
    pub const NO_MEMORY: i32 = err(0x8002_8000);
}
