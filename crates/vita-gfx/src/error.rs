//! Error types for the graphics core.

use crate::driver::{DriverError, MemBlockKind, ParameterCategory, ProgramId};

/// Device memory allocation failure.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("requested alignment {requested} exceeds the {limit}-byte unit of {kind} memory")]
    AlignmentTooLarge {
        kind: MemBlockKind,
        requested: u32,
        limit: u32,
    },
    #[error("zero-sized {kind} allocation")]
    ZeroSize { kind: MemBlockKind },
    #[error("{size}-byte {kind} allocation overflows when rounded to {unit} bytes")]
    SizeOverflow {
        kind: MemBlockKind,
        size: u32,
        unit: u32,
    },
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Shader registration and program creation failure.
///
/// Lookup failures (`AttributeNotFound`, `NotAnAttribute`, `StreamTypeNotSet`,
/// `UnknownRegistration`) are recoverable by the caller.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ShaderError {
    #[error("program '{label}' failed its structural check: {source}")]
    ProgramCheck { label: String, source: DriverError },
    #[error("program '{program}' has no parameter named '{name}'")]
    AttributeNotFound { program: String, name: String },
    #[error("parameter '{name}' of program '{program}' is a {category:?}, not an attribute")]
    NotAnAttribute {
        program: String,
        name: String,
        category: ParameterCategory,
    },
    #[error("no vertex stream type selected for program creation")]
    StreamTypeNotSet,
    #[error("{0} is not registered with this patcher")]
    UnknownRegistration(ProgramId),
    #[error("program '{label}' does not match its checksum")]
    ChecksumMismatch { label: String },
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GraphicsError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("graphics context creation failed: {0}")]
    ContextCreation(#[source] DriverError),
    #[error("graphics driver is already initialized")]
    AlreadyInitialized,
    #[error("invalid graphics configuration: {0}")]
    InvalidConfig(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T, E = GraphicsError> = std::result::Result<T, E>;
