use std::collections::BTreeMap;

use crate::driver::{code, BlockId, DeviceAddress, DriverError, MemBlockKind, MemoryAttribs};

/// Base of the simulated device address space.
const ADDRESS_SPACE_BASE: u64 = 0x8100_0000;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum MappedAs {
    Data(MemoryAttribs),
    VertexUsse,
    FragmentUsse,
}

#[derive(Debug)]
pub(super) struct Block {
    pub name: String,
    pub kind: MemBlockKind,
    pub base: DeviceAddress,
    pub bytes: Vec<u8>,
    pub mapped: Option<MappedAs>,
}

impl Block {
    fn contains(&self, address: DeviceAddress, len: u64) -> bool {
        let start = self.base.0;
        let end = start + self.bytes.len() as u64;
        address.0 >= start && address.0.saturating_add(len) <= end
    }

    fn range(&self, address: DeviceAddress, len: usize) -> std::ops::Range<usize> {
        let start = (address.0 - self.base.0) as usize;
        start..start + len
    }
}

/// Kernel memory blocks backed by host buffers.
///
/// Addresses are handed out from a bump pointer and never reused, so a stale
/// address can't alias a newer block.
#[derive(Debug)]
pub(super) struct BlockStore {
    blocks: BTreeMap<BlockId, Block>,
    next_id: i32,
    next_base: u64,
    vertex_usse_offset: u32,
    fragment_usse_offset: u32,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self {
            blocks: BTreeMap::new(),
            next_id: 0x10,
            next_base: ADDRESS_SPACE_BASE,
            vertex_usse_offset: 0,
            fragment_usse_offset: 0,
        }
    }
}

impl BlockStore {
    pub fn alloc(&mut self, name: &str, kind: MemBlockKind, size: u32) -> Result<BlockId, DriverError> {
        let unit = kind.alignment_unit();
        if size == 0 || size % unit != 0 {
            return Err(DriverError::new("alloc_mem_block", code::INVALID_VALUE));
        }

        let unit = u64::from(unit);
        let base = (self.next_base + unit - 1) & !(unit - 1);
        self.next_base = base + u64::from(size);

        let id = BlockId(self.next_id);
        self.next_id += 1;
        self.blocks.insert(
            id,
            Block {
                name: name.to_owned(),
                kind,
                base: DeviceAddress(base),
                bytes: vec![0; size as usize],
                mapped: None,
            },
        );
        Ok(id)
    }

    pub fn base(&self, id: BlockId) -> Result<DeviceAddress, DriverError> {
        self.blocks
            .get(&id)
            .map(|b| b.base)
            .ok_or(DriverError::new("mem_block_base", code::INVALID_UID))
    }

    pub fn free(&mut self, id: BlockId, display_busy: bool) -> Result<(), DriverError> {
        let block = self
            .blocks
            .get(&id)
            .ok_or(DriverError::new("free_mem_block", code::INVALID_UID))?;
        if block.mapped.is_some() {
            return Err(DriverError::new("free_mem_block", code::MEMORY_STILL_MAPPED));
        }
        if display_busy && block.kind == MemBlockKind::UserCdramRw {
            return Err(DriverError::new("free_mem_block", code::MEMORY_IN_USE_BY_DISPLAY));
        }
        self.blocks.remove(&id);
        Ok(())
    }

    pub fn map(&mut self, operation: &'static str, base: DeviceAddress, size: u32, as_: MappedAs) -> Result<(), DriverError> {
        let block = self
            .blocks
            .values_mut()
            .find(|b| b.base == base)
            .ok_or(DriverError::new(operation, code::INVALID_POINTER))?;
        if size == 0 || size as usize > block.bytes.len() {
            return Err(DriverError::new(operation, code::INVALID_VALUE));
        }
        if block.mapped.is_some() {
            return Err(DriverError::new(operation, code::INVALID_VALUE));
        }
        block.mapped = Some(as_);
        Ok(())
    }

    pub fn map_usse(&mut self, operation: &'static str, base: DeviceAddress, size: u32, as_: MappedAs) -> Result<u32, DriverError> {
        self.map(operation, base, size, as_)?;
        let counter = match as_ {
            MappedAs::VertexUsse => &mut self.vertex_usse_offset,
            _ => &mut self.fragment_usse_offset,
        };
        let offset = *counter;
        *counter += size;
        Ok(offset)
    }

    pub fn unmap(&mut self, operation: &'static str, base: DeviceAddress, matches: fn(MappedAs) -> bool) -> Result<(), DriverError> {
        let block = self
            .blocks
            .values_mut()
            .find(|b| b.base == base)
            .ok_or(DriverError::new(operation, code::INVALID_POINTER))?;
        match block.mapped {
            Some(m) if matches(m) => {
                block.mapped = None;
                Ok(())
            }
            _ => Err(DriverError::new(operation, code::INVALID_VALUE)),
        }
    }

    /// Block fully containing `[address, address + len)`.
    pub fn find(&self, address: DeviceAddress, len: u64) -> Option<&Block> {
        self.blocks.values().find(|b| b.contains(address, len))
    }

    /// Like [`find`](Self::find), but only blocks mapped as plain data.
    pub fn find_data(&self, address: DeviceAddress, len: u64) -> Option<&Block> {
        self.find(address, len)
            .filter(|b| matches!(b.mapped, Some(MappedAs::Data(_))))
    }

    pub fn find_mapped(&self, address: DeviceAddress, len: u64, as_: MappedAs) -> Option<&Block> {
        self.find(address, len).filter(|b| b.mapped == Some(as_))
    }

    pub fn write(&mut self, address: DeviceAddress, bytes: &[u8]) -> Result<(), DriverError> {
        let block = self
            .blocks
            .values_mut()
            .find(|b| b.contains(address, bytes.len() as u64))
            .ok_or(DriverError::new("write_memory", code::INVALID_POINTER))?;
        let range = block.range(address, bytes.len());
        block.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn fill(&mut self, address: DeviceAddress, len: u32, word: u32) -> Result<(), DriverError> {
        let block = self
            .blocks
            .values_mut()
            .find(|b| b.contains(address, u64::from(len)))
            .ok_or(DriverError::new("fill_memory", code::INVALID_POINTER))?;
        let range = block.range(address, len as usize);
        let pattern = word.to_le_bytes();
        for chunk in block.bytes[range].chunks_mut(4) {
            chunk.copy_from_slice(&pattern[..chunk.len()]);
        }
        Ok(())
    }

    pub fn read(&self, address: DeviceAddress, len: usize) -> Option<&[u8]> {
        let block = self.find(address, len as u64)?;
        Some(&block.bytes[block.range(address, len)])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn bytes(&self) -> usize {
        self.blocks.values().map(|b| b.bytes.len()).sum()
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, MemBlockKind)> {
        self.blocks.values().map(|b| (b.name.as_str(), b.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u32 = 4096;

    #[test]
    fn bases_respect_kind_alignment() {
        let mut store = BlockStore::default();
        let a = store.alloc("a", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let b = store.alloc("b", MemBlockKind::UserCdramRw, 256 * 1024).unwrap();
        assert_eq!(store.base(a).unwrap().0 % u64::from(PAGE), 0);
        assert_eq!(store.base(b).unwrap().0 % (256 * 1024), 0);
        assert_ne!(store.base(a).unwrap(), store.base(b).unwrap());
    }

    #[test]
    fn unaligned_size_is_rejected() {
        let mut store = BlockStore::default();
        let err = store.alloc("x", MemBlockKind::UserRwUncache, 100).unwrap_err();
        assert_eq!(err.code, code::INVALID_VALUE);
    }

    #[test]
    fn mapped_blocks_cannot_be_freed() {
        let mut store = BlockStore::default();
        let id = store.alloc("x", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let base = store.base(id).unwrap();
        store.map("map_memory", base, PAGE, MappedAs::Data(MemoryAttribs::RW)).unwrap();

        assert_eq!(store.free(id, false).unwrap_err().code, code::MEMORY_STILL_MAPPED);
        store.unmap("unmap_memory", base, |m| matches!(m, MappedAs::Data(_))).unwrap();
        store.free(id, false).unwrap();
        assert_eq!(store.free(id, false).unwrap_err().code, code::INVALID_UID);
    }

    #[test]
    fn cdram_is_held_while_the_display_is_busy() {
        let mut store = BlockStore::default();
        let id = store.alloc("fb", MemBlockKind::UserCdramRw, 256 * 1024).unwrap();
        assert_eq!(store.free(id, true).unwrap_err().code, code::MEMORY_IN_USE_BY_DISPLAY);
        store.free(id, false).unwrap();
    }

    #[test]
    fn fill_repeats_the_word_and_truncates() {
        let mut store = BlockStore::default();
        let id = store.alloc("x", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let base = store.base(id).unwrap();

        store.fill(base, 6, 0xAABB_CCDD).unwrap();
        assert_eq!(store.read(base, 8).unwrap(), &[0xDD, 0xCC, 0xBB, 0xAA, 0xDD, 0xCC, 0, 0]);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut store = BlockStore::default();
        let id = store.alloc("x", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let base = store.base(id).unwrap();
        assert!(store.write(base.offset(u64::from(PAGE) - 2), &[1, 2, 3, 4]).is_err());
        assert!(store.read(base, PAGE as usize + 1).is_none());
    }

    #[test]
    fn usse_offsets_advance_per_heap() {
        let mut store = BlockStore::default();
        let v1 = store.alloc("v1", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let v2 = store.alloc("v2", MemBlockKind::UserRwUncache, PAGE).unwrap();
        let f1 = store.alloc("f1", MemBlockKind::UserRwUncache, PAGE).unwrap();

        let o1 = store.map_usse("v", store.base(v1).unwrap(), PAGE, MappedAs::VertexUsse).unwrap();
        let o2 = store.map_usse("v", store.base(v2).unwrap(), PAGE, MappedAs::VertexUsse).unwrap();
        let o3 = store.map_usse("f", store.base(f1).unwrap(), PAGE, MappedAs::FragmentUsse).unwrap();
        assert_eq!((o1, o2, o3), (0, PAGE, 0));
    }
}
