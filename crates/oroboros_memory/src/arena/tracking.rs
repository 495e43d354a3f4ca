//! # Tracking Arena
//!
//! Wraps any arena and remembers every outstanding block together with the
//! request that produced it, so leaks and bad frees can be traced back to a
//! source line.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;

use super::Arena;
use crate::provenance::AllocationRequest;

/// A block that has been allocated and not freed yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outstanding {
    /// Address of the block.
    pub address: usize,
    /// The request that produced it.
    pub request: AllocationRequest,
    /// Order of the allocation among all successful allocations.
    pub sequence: u64,
}

/// Counters maintained by a [`TrackingArena`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackingStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Frees of tracked blocks.
    pub frees: u64,
    /// Requests the inner arena refused.
    pub failed_allocations: u64,
    /// Frees of pointers that were not outstanding (double or foreign frees).
    pub rejected_frees: u64,
    /// Bytes currently outstanding.
    pub current_bytes: usize,
    /// Highest value `current_bytes` has reached.
    pub peak_bytes: usize,
}

/// Diagnostic wrapper recording the provenance of every live block.
///
/// Frees of pointers that are not outstanding are *not* forwarded to the
/// inner arena; they are counted in [`TrackingStats::rejected_frees`] and
/// logged, which turns a double free into a diagnosable event instead of
/// heap corruption.
///
/// Dropping a tracking arena with outstanding blocks logs one warning per
/// leaked block.
pub struct TrackingArena<A: Arena> {
    inner: A,
    outstanding: RefCell<HashMap<usize, Outstanding>>,
    stats: Cell<TrackingStats>,
}

impl<A: Arena> TrackingArena<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            outstanding: RefCell::new(HashMap::new()),
            stats: Cell::new(TrackingStats::default()),
        }
    }

    /// The wrapped arena.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TrackingStats {
        self.stats.get()
    }

    /// Number of blocks allocated and not yet freed.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.borrow().len()
    }

    /// Every outstanding block, oldest first.
    pub fn outstanding(&self) -> Vec<Outstanding> {
        let mut blocks: Vec<Outstanding> = self.outstanding.borrow().values().copied().collect();
        blocks.sort_by_key(|block| block.sequence);
        blocks
    }

    /// Logs every outstanding block as a leak and returns them.
    pub fn report_leaks(&self) -> Vec<Outstanding> {
        let leaks = self.outstanding();
        for leak in &leaks {
            tracing::warn!(
                address = leak.address,
                size = leak.request.size,
                alignment = leak.request.alignment,
                category = leak.request.category.map_or("<none>", |c| c.name()),
                origin = %leak.request.provenance,
                "leaked allocation"
            );
        }
        leaks
    }

    fn update(&self, change: impl FnOnce(&mut TrackingStats)) {
        let mut stats = self.stats.get();
        change(&mut stats);
        self.stats.set(stats);
    }
}

impl<A: Arena> Arena for TrackingArena<A> {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        let Some(ptr) = self.inner.allocate(request) else {
            self.update(|stats| stats.failed_allocations += 1);
            return None;
        };

        let sequence = self.stats.get().allocations;
        let address = ptr.as_ptr() as usize;
        self.outstanding.borrow_mut().insert(
            address,
            Outstanding {
                address,
                request: *request,
                sequence,
            },
        );
        self.update(|stats| {
            stats.allocations += 1;
            stats.current_bytes += request.size;
            stats.peak_bytes = stats.peak_bytes.max(stats.current_bytes);
        });
        Some(ptr)
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let address = ptr.as_ptr() as usize;
        let Some(block) = self.outstanding.borrow_mut().remove(&address) else {
            self.update(|stats| stats.rejected_frees += 1);
            tracing::warn!(address, "free of a pointer that is not outstanding, ignored");
            return;
        };

        self.update(|stats| {
            stats.frees += 1;
            stats.current_bytes -= block.request.size;
        });
        // SAFETY: the block was outstanding, so it came from `inner` and has
        // not been freed yet.
        unsafe { self.inner.free(Some(ptr)) }
    }
}

impl<A: Arena> Drop for TrackingArena<A> {
    fn drop(&mut self) {
        if self.outstanding.get_mut().is_empty() {
            return;
        }
        let leaks = self.report_leaks();
        tracing::warn!(count = leaks.len(), "tracking arena dropped with outstanding allocations");
    }
}

impl<A: Arena> std::fmt::Debug for TrackingArena<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingArena")
            .field("outstanding", &self.outstanding_count())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
