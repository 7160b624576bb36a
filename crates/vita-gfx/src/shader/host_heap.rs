use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::driver::{HostHeap, HostPtr};

/// Host heap for patcher bookkeeping that tracks every live allocation.
///
/// Backed by ordinary heap allocations; the patcher never sees GPU memory
/// through it.
#[derive(Debug, Default)]
pub struct TrackingHostHeap {
    next: AtomicU32,
    live: Mutex<HashMap<HostPtr, Box<[u8]>>>,
}

impl TrackingHostHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Bytes held by allocations not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.len())
            .sum()
    }
}

impl HostHeap for TrackingHostHeap {
    fn allocate(&self, size: usize) -> Option<HostPtr> {
        let ptr = HostPtr(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        log::trace!("patcher host alloc: {size} bytes -> {ptr}");
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ptr, vec![0u8; size].into_boxed_slice());
        Some(ptr)
    }

    fn free(&self, ptr: HostPtr) {
        log::trace!("patcher host free: {ptr}");
        let removed = self.live.lock().unwrap_or_else(PoisonError::into_inner).remove(&ptr);
        if removed.is_none() {
            log::warn!("patcher host free of unknown allocation {ptr}");
        }
    }
}
