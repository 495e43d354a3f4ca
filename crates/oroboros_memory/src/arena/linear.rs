//! # Linear Arena
//!
//! A bump allocator for temporary allocations that are released all at once.

use std::cell::Cell;
use std::ptr::NonNull;

use super::region::{align_up, Region, DEFAULT_REGION_ALIGNMENT};
use super::Arena;
use crate::error::MemoryResult;
use crate::provenance::AllocationRequest;

/// A bump-pointer arena.
///
/// Allocations are fast (just bump an offset). Individual frees are no-ops;
/// memory comes back all at once when the arena is [reset](Self::reset) or
/// dropped.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{ArenaBox, LinearArena};
///
/// let mut arena = LinearArena::new(1024 * 1024).unwrap(); // 1MB
/// {
///     let value = ArenaBox::new_in(42_u64, &arena).unwrap();
///     assert_eq!(*value, 42);
/// }
/// // Reset to reclaim everything
/// arena.reset();
/// assert_eq!(arena.used(), 0);
/// ```
pub struct LinearArena {
    region: Region,
    /// Current allocation offset.
    offset: Cell<usize>,
}

impl LinearArena {
    /// Creates a new arena with the specified capacity in bytes.
    ///
    /// # Errors
    ///
    /// Fails if `capacity` is zero or the backing region cannot be allocated.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        let region = Region::new(capacity, DEFAULT_REGION_ALIGNMENT)?;
        tracing::debug!(capacity, "linear arena created");
        Ok(Self {
            region,
            offset: Cell::new(0),
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Returns the current used space in bytes, alignment padding included.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Resets the arena, reclaiming every allocation.
    ///
    /// Takes `&mut self` so no handle borrowing the arena can outlive the
    /// reset. Raw pointers obtained earlier become dangling.
    #[inline]
    pub fn reset(&mut self) {
        self.offset.set(0);
    }
}

impl Arena for LinearArena {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        if !request.is_valid() {
            return None;
        }

        let base = self.region.address();
        let aligned = align_up(base.checked_add(self.offset.get())?, request.alignment)?;
        let start = aligned - base;
        let end = start.checked_add(request.size)?;

        if end > self.capacity() {
            return None;
        }

        self.offset.set(end);
        Some(self.region.at(start))
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        if let Some(ptr) = ptr {
            debug_assert!(
                self.region.offset_of(ptr).is_some(),
                "pointer does not belong to this linear arena"
            );
        }
    }
}

impl std::fmt::Debug for LinearArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::Provenance;

    fn request(size: usize, alignment: usize) -> AllocationRequest {
        AllocationRequest::new(size, alignment, Provenance::new("Test", 42))
    }

    #[test]
    fn test_arena_allocation() {
        let arena = LinearArena::new(1024).unwrap();
        let ptr = arena.allocate(&request(40, 4)).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 4, 0);
        assert_eq!(arena.used(), 40);
    }

    #[test]
    fn test_arena_alignment_padding() {
        let arena = LinearArena::new(1024).unwrap();
        let _ = arena.allocate(&request(1, 1)).unwrap();
        let ptr = arena.allocate(&request(8, 64)).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        assert!(arena.used() >= 9);
    }

    #[test]
    fn test_arena_exhaustion() {
        let arena = LinearArena::new(64).unwrap();
        assert!(arena.allocate(&request(48, 16)).is_some());
        assert!(arena.allocate(&request(32, 16)).is_none());
        assert!(arena.allocate(&request(16, 16)).is_some());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_arena_reset() {
        let mut arena = LinearArena::new(1024).unwrap();
        let ptr = arena.allocate(&request(10, 4)).unwrap();
        unsafe { arena.free(Some(ptr)) };
        assert!(arena.used() > 0);

        arena.reset();
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(LinearArena::new(0).is_err());
    }
}
