use std::fmt;

use bitflags::bitflags;

/// Kernel identifier of an allocated memory block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub i32);

impl BlockId {
    pub const INVALID: BlockId = BlockId(-1);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid:{}", self.0)
    }
}

/// Address of a block as seen by both the CPU and the GPU once mapped.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    pub const NULL: DeviceAddress = DeviceAddress(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Physical memory class a block is carved from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemBlockKind {
    /// Uncached LPDDR main memory, usable for ring buffers and geometry.
    UserRwUncache,
    /// Video memory (CDRAM), used for display buffers.
    UserCdramRw,
}

impl MemBlockKind {
    /// Granularity the kernel allocates this class in. Block sizes are
    /// rounded up to it and no stronger alignment can be requested.
    #[inline]
    pub const fn alignment_unit(self) -> u32 {
        match self {
            MemBlockKind::UserCdramRw => 256 * 1024,
            MemBlockKind::UserRwUncache => 4 * 1024,
        }
    }
}

impl fmt::Display for MemBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemBlockKind::UserRwUncache => f.write_str("USER_RW_UNCACHE"),
            MemBlockKind::UserCdramRw => f.write_str("USER_CDRAM_RW"),
        }
    }
}

bitflags! {
    /// GPU access rights for a mapped block.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct MemoryAttribs: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

macro_rules! driver_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

driver_handle!(
    /// Rendering context created from the ring buffers.
    ContextHandle
);
driver_handle!(
    /// Scheduling geometry for scenes; holds no pixel storage.
    RenderTargetHandle
);
driver_handle!(
    /// CPU/GPU fence attached to one display buffer.
    SyncObjectHandle
);
driver_handle!(
    /// Driver object that links registered binaries into executable programs.
    PatcherHandle
);
driver_handle!(
    /// Identifier assigned to a binary registered with a patcher.
    ProgramId
);
driver_handle!(VertexProgramHandle);
driver_handle!(FragmentProgramHandle);
driver_handle!(
    /// Host-side allocation handed out by a patcher host heap.
    HostPtr
);

/// Reserved default uniform buffer for the currently bound vertex program.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformBuffer(pub DeviceAddress);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_units_per_kind() {
        assert_eq!(MemBlockKind::UserCdramRw.alignment_unit(), 262_144);
        assert_eq!(MemBlockKind::UserRwUncache.alignment_unit(), 4096);
    }

    #[test]
    fn rw_contains_read_and_write() {
        assert!(MemoryAttribs::RW.contains(MemoryAttribs::READ));
        assert!(MemoryAttribs::RW.contains(MemoryAttribs::WRITE));
    }

    #[test]
    fn block_id_validity() {
        assert!(!BlockId::INVALID.is_valid());
        assert!(BlockId(0).is_valid());
    }
}
