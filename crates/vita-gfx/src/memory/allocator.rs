use std::collections::BTreeMap;

use crate::driver::{BlockId, DeviceAddress, GpuDriver, MemBlockKind, MemoryAttribs};
use crate::error::AllocationError;

/// Rounds `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
pub fn align_up(value: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// How a block is visible to the GPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mapping {
    Data(MemoryAttribs),
    VertexUsse { offset: u32 },
    FragmentUsse { offset: u32 },
}

/// A kernel memory block mapped for GPU access.
///
/// Descriptor only; the allocator that produced it owns the block until it
/// is released.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryBlock {
    id: BlockId,
    base: DeviceAddress,
    size: u32,
    kind: MemBlockKind,
    mapping: Mapping,
}

impl MemoryBlock {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn base(&self) -> DeviceAddress {
        self.base
    }

    /// Actual size after rounding to the kind's alignment unit.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn kind(&self) -> MemBlockKind {
        self.kind
    }

    #[inline]
    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    /// Offset within the microcode heap, for USSE-mapped blocks.
    pub fn usse_offset(&self) -> Option<u32> {
        match self.mapping {
            Mapping::VertexUsse { offset } | Mapping::FragmentUsse { offset } => Some(offset),
            Mapping::Data(_) => None,
        }
    }
}

/// Allocates kernel memory blocks and maps them for the GPU.
///
/// Tracks every live block so teardown can release them by identifier and
/// so leaks are observable.
#[derive(Debug, Default)]
pub struct DeviceAllocator {
    live: BTreeMap<BlockId, MemoryBlock>,
}

impl DeviceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a data block of at least `size` bytes and maps it with `attribs`.
    ///
    /// The size is rounded up to the kind's alignment unit. Blocks are always
    /// aligned to that unit, so `alignment` can only be checked against it.
    pub fn allocate<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        kind: MemBlockKind,
        size: u32,
        alignment: u32,
        attribs: MemoryAttribs,
    ) -> Result<MemoryBlock, AllocationError> {
        let size = rounded_size(kind, size, alignment)?;
        log::debug!("allocating {size} bytes of {kind} memory (attribs {attribs:?})");

        let (id, base) = alloc_block(driver, kind, size)?;
        if let Err(err) = driver.map_memory(base, size, attribs) {
            log::warn!("mapping {id} failed: {err}");
            free_quietly(driver, id);
            return Err(err.into());
        }

        Ok(self.track(MemoryBlock {
            id,
            base,
            size,
            kind,
            mapping: Mapping::Data(attribs),
        }))
    }

    /// Allocates a block and maps it as vertex microcode.
    pub fn allocate_vertex_usse<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        size: u32,
    ) -> Result<MemoryBlock, AllocationError> {
        self.allocate_usse(driver, size, UsseStage::Vertex)
    }

    /// Allocates a block and maps it as fragment microcode.
    pub fn allocate_fragment_usse<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        size: u32,
    ) -> Result<MemoryBlock, AllocationError> {
        self.allocate_usse(driver, size, UsseStage::Fragment)
    }

    fn allocate_usse<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        size: u32,
        stage: UsseStage,
    ) -> Result<MemoryBlock, AllocationError> {
        let kind = MemBlockKind::UserRwUncache;
        let size = rounded_size(kind, size, 0)?;
        log::debug!("allocating {size} bytes of {stage:?} USSE memory");

        let (id, base) = alloc_block(driver, kind, size)?;
        let mapped = match stage {
            UsseStage::Vertex => driver.map_vertex_usse_memory(base, size),
            UsseStage::Fragment => driver.map_fragment_usse_memory(base, size),
        };
        let offset = match mapped {
            Ok(offset) => offset,
            Err(err) => {
                log::warn!("mapping {id} as {stage:?} USSE failed: {err}");
                free_quietly(driver, id);
                return Err(err.into());
            }
        };
        log::debug!("{id} mapped as {stage:?} USSE at offset {offset:#x}");

        let mapping = match stage {
            UsseStage::Vertex => Mapping::VertexUsse { offset },
            UsseStage::Fragment => Mapping::FragmentUsse { offset },
        };
        Ok(self.track(MemoryBlock {
            id,
            base,
            size,
            kind,
            mapping,
        }))
    }

    /// Unmaps and frees a block.
    ///
    /// Unknown or already-released identifiers are ignored: teardown may run
    /// after a partial initialization failure. Returns `true` if a block was
    /// released. A block the kernel refuses to free stays tracked.
    pub fn release<D: GpuDriver + ?Sized>(&mut self, driver: &mut D, id: BlockId) -> bool {
        let Some(block) = self.live.remove(&id) else {
            log::debug!("release of {id} ignored: not a live block");
            return false;
        };
        log::debug!("releasing {id} ({} bytes of {})", block.size, block.kind);

        let base = block.base;
        let unmapped = match block.mapping {
            Mapping::Data(_) => driver.unmap_memory(base),
            Mapping::VertexUsse { .. } => driver.unmap_vertex_usse_memory(base),
            Mapping::FragmentUsse { .. } => driver.unmap_fragment_usse_memory(base),
        };
        if let Err(err) = unmapped {
            log::warn!("unmapping {id} failed: {err}");
        }

        match driver.free_mem_block(id) {
            Ok(()) => true,
            Err(err) => {
                // Still owned by the kernel; keep tracking it so a later release can reclaim it.
                log::warn!("freeing {id} failed: {err}");
                self.live.insert(id, block);
                false
            }
        }
    }

    /// Releases every block still tracked. Returns how many were released.
    pub fn release_all<D: GpuDriver + ?Sized>(&mut self, driver: &mut D) -> usize {
        let ids: Vec<BlockId> = self.live.keys().copied().collect();
        ids.into_iter().filter(|id| self.release(driver, *id)).count()
    }

    pub fn get(&self, id: BlockId) -> Option<&MemoryBlock> {
        self.live.get(&id)
    }

    /// Live blocks in identifier order.
    pub fn live_blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.live.values()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn track(&mut self, block: MemoryBlock) -> MemoryBlock {
        log::debug!(
            "allocated {} bytes of {} memory as {} at {}",
            block.size,
            block.kind,
            block.id,
            block.base
        );
        self.live.insert(block.id, block);
        block
    }
}

#[derive(Debug, Copy, Clone)]
enum UsseStage {
    Vertex,
    Fragment,
}

fn rounded_size(kind: MemBlockKind, size: u32, alignment: u32) -> Result<u32, AllocationError> {
    let unit = kind.alignment_unit();
    if alignment > unit {
        return Err(AllocationError::AlignmentTooLarge {
            kind,
            requested: alignment,
            limit: unit,
        });
    }
    if size == 0 {
        return Err(AllocationError::ZeroSize { kind });
    }
    align_up(size, unit).ok_or(AllocationError::SizeOverflow { kind, size, unit })
}

fn alloc_block<D: GpuDriver + ?Sized>(
    driver: &mut D,
    kind: MemBlockKind,
    size: u32,
) -> Result<(BlockId, DeviceAddress), AllocationError> {
    let id = driver.alloc_mem_block("gpu_mem", kind, size)?;
    match driver.mem_block_base(id) {
        Ok(base) => Ok((id, base)),
        Err(err) => {
            free_quietly(driver, id);
            Err(err.into())
        }
    }
}

fn free_quietly<D: GpuDriver + ?Sized>(driver: &mut D, id: BlockId) {
    if let Err(err) = driver.free_mem_block(id) {
        log::warn!("freeing {id} after a failed allocation also failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{code, HeadlessDriver};

    const KIB: u32 = 1024;

    // ── rounding ──────────────────────────────────────────────────────────

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(1, 4096), Some(4096));
        assert_eq!(align_up(4096, 4096), Some(4096));
        assert_eq!(align_up(4097, 4096), Some(8192));
        assert_eq!(align_up(u32::MAX, 4096), None);
    }

    #[test]
    fn sizes_round_to_the_kind_unit() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();

        for (kind, size) in [
            (MemBlockKind::UserRwUncache, 1),
            (MemBlockKind::UserRwUncache, 4 * KIB),
            (MemBlockKind::UserRwUncache, 4 * KIB + 1),
            (MemBlockKind::UserCdramRw, 1),
            (MemBlockKind::UserCdramRw, 4 * 1024 * 544),
        ] {
            let unit = kind.alignment_unit();
            let block = alloc
                .allocate(&mut driver, kind, size, 4, MemoryAttribs::READ)
                .unwrap();
            assert_eq!(block.size() % unit, 0);
            assert!(block.size() >= size);
            assert!(block.size() - size < unit, "{kind}: {size} -> {}", block.size());
        }
    }

    // ── alignment ─────────────────────────────────────────────────────────

    #[test]
    fn alignment_beyond_unit_is_rejected() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();

        let err = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 64, 8 * KIB, MemoryAttribs::READ)
            .unwrap_err();
        assert!(matches!(err, AllocationError::AlignmentTooLarge { limit: 4096, .. }));

        // CDRAM accepts up to its 256 KiB unit.
        assert!(alloc
            .allocate(&mut driver, MemBlockKind::UserCdramRw, 64, 256 * KIB, MemoryAttribs::RW)
            .is_ok());
        assert_eq!(driver.live_block_count(), 1);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let err = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 0, 4, MemoryAttribs::READ)
            .unwrap_err();
        assert_eq!(err, AllocationError::ZeroSize { kind: MemBlockKind::UserRwUncache });
    }

    // ── release ───────────────────────────────────────────────────────────

    #[test]
    fn release_unmaps_and_frees() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let block = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 100, 4, MemoryAttribs::RW)
            .unwrap();
        assert_eq!(alloc.live_count(), 1);

        assert!(alloc.release(&mut driver, block.id()));
        assert_eq!(alloc.live_count(), 0);
        assert_eq!(driver.live_block_count(), 0);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let block = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 100, 4, MemoryAttribs::RW)
            .unwrap();

        assert!(alloc.release(&mut driver, block.id()));
        assert!(!alloc.release(&mut driver, block.id()));
        assert!(!alloc.release(&mut driver, BlockId::INVALID));
    }

    #[test]
    fn release_uses_the_tracked_base() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let block = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 100, 4, MemoryAttribs::RW)
            .unwrap();
        driver.fail_next("mem_block_base", code::INVALID_UID);

        assert!(alloc.release(&mut driver, block.id()));
        assert_eq!(alloc.live_count(), 0);
        assert_eq!(driver.live_block_count(), 0);
    }

    #[test]
    fn failed_free_keeps_the_block_tracked() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let block = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 100, 4, MemoryAttribs::RW)
            .unwrap();
        driver.fail_next("free_mem_block", code::INVALID_UID);

        assert!(!alloc.release(&mut driver, block.id()));
        assert_eq!(alloc.live_count(), 1);
        assert_eq!(driver.live_block_count(), 1);

        assert_eq!(alloc.release_all(&mut driver), 1);
        assert_eq!(alloc.live_count(), 0);
        assert_eq!(driver.live_block_count(), 0);
    }

    #[test]
    fn usse_blocks_carry_offsets() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        let v = alloc.allocate_vertex_usse(&mut driver, 64 * KIB).unwrap();
        let f = alloc.allocate_fragment_usse(&mut driver, 16 * KIB).unwrap();
        assert!(matches!(v.mapping(), Mapping::VertexUsse { .. }));
        assert!(matches!(f.mapping(), Mapping::FragmentUsse { .. }));
        assert!(v.usse_offset().is_some());

        assert_eq!(alloc.release_all(&mut driver), 2);
        assert_eq!(driver.live_block_count(), 0);
    }

    #[test]
    fn failed_mapping_frees_the_block() {
        let mut driver = HeadlessDriver::new();
        let mut alloc = DeviceAllocator::new();
        driver.fail_next("map_memory", code::INVALID_VALUE);

        let err = alloc
            .allocate(&mut driver, MemBlockKind::UserRwUncache, 100, 4, MemoryAttribs::RW)
            .unwrap_err();
        assert!(matches!(err, AllocationError::Driver(_)));
        assert_eq!(alloc.live_count(), 0);
        assert_eq!(driver.live_block_count(), 0);
    }
}
