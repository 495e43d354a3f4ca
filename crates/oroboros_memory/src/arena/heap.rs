//! # Heap Arena
//!
//! The reference backend: every request goes straight to the system
//! allocator.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;

use super::Arena;
use crate::provenance::AllocationRequest;

/// Arena backed by the global system allocator.
///
/// The layout of every live block is remembered so that `free` only needs
/// the pointer. Exhaustion is reported as `None`, exactly like every other
/// arena, so callers exercise the same failure path in production and in
/// tests.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Wrap it in a
/// [`LockedArena`](super::LockedArena) to share it.
#[derive(Debug, Default)]
pub struct HeapArena {
    /// Layouts of live blocks, keyed by address.
    live: RefCell<HashMap<usize, Layout>>,
}

impl HeapArena {
    /// Creates an empty heap arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks allocated and not yet freed.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.live.borrow().len()
    }

    /// Total bytes held by live blocks.
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live.borrow().values().map(Layout::size).sum()
    }
}

impl Arena for HeapArena {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        let layout = request.layout()?;

        // SAFETY: `layout()` only succeeds for non-zero sizes.
        let ptr = NonNull::new(unsafe { alloc(layout) })?;
        self.live.borrow_mut().insert(ptr.as_ptr() as usize, layout);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let layout = self.live.borrow_mut().remove(&(ptr.as_ptr() as usize));
        debug_assert!(layout.is_some(), "heap arena asked to free a pointer it does not own");
        if let Some(layout) = layout {
            // SAFETY: the block was allocated by `allocate` with this layout
            // and is removed from the live set exactly once.
            unsafe { dealloc(ptr.as_ptr(), layout) }
        }
    }
}

impl Drop for HeapArena {
    fn drop(&mut self) {
        let live = self.live.get_mut();
        if live.is_empty() {
            return;
        }

        tracing::warn!(
            blocks = live.len(),
            bytes = live.values().map(Layout::size).sum::<usize>(),
            "heap arena dropped with live allocations, releasing them"
        );
        for (address, layout) in live.drain() {
            // SAFETY: every entry is a live block allocated with its layout.
            unsafe { dealloc(address as *mut u8, layout) }
        }
    }
}
