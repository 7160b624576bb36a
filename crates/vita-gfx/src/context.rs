//! Ring buffers and the rendering context built on them.

use crate::driver::{
    ContextHandle, ContextParams, DriverError, GpuDriver, MemBlockKind, MemoryAttribs, Region,
    UsseRegion,
};
use crate::error::{AllocationError, GraphicsError};
use crate::memory::{DeviceAllocator, MemoryBlock};

/// Smallest host memory block the driver accepts for a context.
pub const MINIMUM_CONTEXT_HOST_MEM_SIZE: usize = 2048;

const KIB: u32 = 1024;
const MIB: u32 = 1024 * KIB;

/// Circular command/data areas the driver writes while building scenes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RingBufferKind {
    Vdm,
    Vertex,
    Fragment,
    FragmentUsse,
    VertexUsse,
}

/// Ring buffer sizes, in bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RingBufferSizes {
    pub vdm: u32,
    pub vertex: u32,
    pub fragment: u32,
    pub fragment_usse: u32,
    pub vertex_usse: u32,
}

impl Default for RingBufferSizes {
    fn default() -> Self {
        Self {
            vdm: 128 * KIB,
            vertex: 2 * MIB,
            fragment: 512 * KIB,
            fragment_usse: 16 * KIB,
            vertex_usse: 16 * KIB,
        }
    }
}

/// The memory backing one context.
///
/// The vertex USSE ring is optional; when absent the driver falls back to
/// its internal default.
#[derive(Debug)]
pub struct RingBufferSet {
    vdm: MemoryBlock,
    vertex: MemoryBlock,
    fragment: MemoryBlock,
    fragment_usse: MemoryBlock,
    vertex_usse: Option<MemoryBlock>,
}

impl RingBufferSet {
    /// Allocates every ring. On failure the rings already allocated are
    /// released before the error is returned.
    pub fn allocate<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        sizes: &RingBufferSizes,
        with_vertex_usse: bool,
    ) -> Result<Self, AllocationError> {
        let mut held: Vec<MemoryBlock> = Vec::with_capacity(5);
        let result = Self::allocate_into(allocator, driver, sizes, with_vertex_usse, &mut held);
        if result.is_err() {
            for block in held {
                allocator.release(driver, block.id());
            }
        }
        result
    }

    fn allocate_into<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        sizes: &RingBufferSizes,
        with_vertex_usse: bool,
        held: &mut Vec<MemoryBlock>,
    ) -> Result<Self, AllocationError> {
        let vdm = data_ring(allocator, driver, sizes.vdm, held)?;
        let vertex = data_ring(allocator, driver, sizes.vertex, held)?;
        let fragment = data_ring(allocator, driver, sizes.fragment, held)?;

        let fragment_usse = allocator.allocate_fragment_usse(driver, sizes.fragment_usse)?;
        held.push(fragment_usse);

        let vertex_usse = if with_vertex_usse {
            let block = allocator.allocate_vertex_usse(driver, sizes.vertex_usse)?;
            held.push(block);
            Some(block)
        } else {
            None
        };

        Ok(Self {
            vdm,
            vertex,
            fragment,
            fragment_usse,
            vertex_usse,
        })
    }

    pub fn get(&self, kind: RingBufferKind) -> Option<&MemoryBlock> {
        match kind {
            RingBufferKind::Vdm => Some(&self.vdm),
            RingBufferKind::Vertex => Some(&self.vertex),
            RingBufferKind::Fragment => Some(&self.fragment),
            RingBufferKind::FragmentUsse => Some(&self.fragment_usse),
            RingBufferKind::VertexUsse => self.vertex_usse.as_ref(),
        }
    }

    /// Context parameters pointing at these rings.
    pub fn context_params(&self, host_mem_size: usize) -> ContextParams {
        let region = |b: &MemoryBlock| Region {
            address: b.base(),
            size: b.size(),
        };
        let usse = |b: &MemoryBlock| UsseRegion {
            address: b.base(),
            size: b.size(),
            offset: b.usse_offset().unwrap_or(0),
        };

        ContextParams {
            host_mem_size,
            vdm_ring_buffer: region(&self.vdm),
            vertex_ring_buffer: region(&self.vertex),
            fragment_ring_buffer: region(&self.fragment),
            fragment_usse_ring_buffer: usse(&self.fragment_usse),
            vertex_usse_ring_buffer: self.vertex_usse.as_ref().map(usse),
        }
    }

    pub fn release<D: GpuDriver + ?Sized>(self, allocator: &mut DeviceAllocator, driver: &mut D) {
        let blocks = [self.vdm, self.vertex, self.fragment, self.fragment_usse]
            .into_iter()
            .chain(self.vertex_usse);
        for block in blocks {
            allocator.release(driver, block.id());
        }
    }
}

fn data_ring<D: GpuDriver + ?Sized>(
    allocator: &mut DeviceAllocator,
    driver: &mut D,
    size: u32,
    held: &mut Vec<MemoryBlock>,
) -> Result<MemoryBlock, AllocationError> {
    let block = allocator.allocate(driver, MemBlockKind::UserRwUncache, size, 4, MemoryAttribs::READ)?;
    held.push(block);
    Ok(block)
}

/// Rendering context and the ring buffers it owns.
#[derive(Debug)]
pub struct GraphicsContext {
    handle: ContextHandle,
    rings: RingBufferSet,
    host_mem: Box<[u8]>,
}

impl GraphicsContext {
    /// Allocates the rings and creates the context.
    ///
    /// If the driver refuses the context the rings are released and
    /// [`GraphicsError::ContextCreation`] is returned.
    pub fn create<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        sizes: &RingBufferSizes,
        with_vertex_usse: bool,
    ) -> Result<Self, GraphicsError> {
        let rings = RingBufferSet::allocate(allocator, driver, sizes, with_vertex_usse)?;
        let host_mem = vec![0u8; MINIMUM_CONTEXT_HOST_MEM_SIZE].into_boxed_slice();
        let params = rings.context_params(host_mem.len());

        match driver.create_context(&params) {
            Ok(handle) => {
                log::debug!("context created: {handle}");
                Ok(Self {
                    handle,
                    rings,
                    host_mem,
                })
            }
            Err(err) => {
                log::error!("context creation failed: {err}");
                rings.release(allocator, driver);
                Err(GraphicsError::ContextCreation(err))
            }
        }
    }

    #[inline]
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    #[inline]
    pub fn rings(&self) -> &RingBufferSet {
        &self.rings
    }

    #[inline]
    pub fn host_mem_size(&self) -> usize {
        self.host_mem.len()
    }

    /// Destroys the context, then releases its rings.
    ///
    /// The rings are released even if the driver rejects the destroy.
    pub fn destroy<D: GpuDriver + ?Sized>(
        self,
        allocator: &mut DeviceAllocator,
        driver: &mut D,
    ) -> Result<(), DriverError> {
        log::debug!("destroying context {}", self.handle);
        let destroyed = driver.destroy_context(self.handle);
        self.rings.release(allocator, driver);
        destroyed
    }
}
