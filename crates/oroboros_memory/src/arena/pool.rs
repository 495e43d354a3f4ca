//! # Pool Arena
//!
//! Fixed-size block arena for objects that are frequently allocated and freed.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use super::region::{align_up, Region};
use super::Arena;
use crate::error::{MemoryError, MemoryResult};
use crate::provenance::AllocationRequest;

/// An arena handing out blocks of one fixed size.
///
/// Every block has the same size and the same maximum alignment. This is
/// perfect for things like particles, network packets, or mesh primitive
/// records. Requests larger than a block, or more aligned than the pool,
/// are refused with `None`.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use one pool per thread or wrap it in a
/// [`LockedArena`](super::LockedArena).
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{ArenaBox, PoolArena};
///
/// struct Particle { x: f32, y: f32, life: f32 }
///
/// let pool = PoolArena::new(16, 16, 10_000).unwrap();
///
/// // Allocate - O(1), no heap allocation
/// let particle = ArenaBox::new_in(Particle { x: 0.0, y: 0.0, life: 1.0 }, &pool).unwrap();
/// assert_eq!(pool.allocated_count(), 1);
///
/// // Free - O(1), no heap deallocation
/// drop(particle);
/// assert_eq!(pool.allocated_count(), 0);
/// ```
pub struct PoolArena {
    region: Region,
    /// Usable bytes per block.
    block_size: usize,
    /// Maximum alignment a block can satisfy.
    block_alignment: usize,
    /// Distance between consecutive blocks.
    stride: usize,
    /// Free list - indices of available blocks.
    free_list: RefCell<Vec<usize>>,
    /// Which blocks are handed out, to catch double frees.
    occupied: RefCell<Vec<bool>>,
    /// Number of allocated blocks.
    allocated_count: Cell<usize>,
    /// Total number of blocks.
    capacity: usize,
}

impl PoolArena {
    /// Creates a pool of `block_count` blocks of `block_size` bytes, each
    /// aligned to `block_alignment`.
    ///
    /// All memory is pre-allocated upfront.
    ///
    /// # Errors
    ///
    /// Fails if the size or count is zero, the alignment is not a power of
    /// two, or the region does not fit in memory.
    pub fn new(
        block_size: usize,
        block_alignment: usize,
        block_count: usize,
    ) -> MemoryResult<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(MemoryError::ZeroCapacity);
        }
        if !block_alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(block_alignment));
        }

        let overflow = MemoryError::CapacityOverflow {
            count: block_count,
            size: block_size,
        };
        let stride = align_up(block_size, block_alignment).ok_or_else(|| overflow.clone())?;
        let total = stride.checked_mul(block_count).ok_or(overflow)?;
        let region = Region::new(total, block_alignment)?;

        tracing::debug!(block_size, block_alignment, block_count, "pool arena created");

        Ok(Self {
            region,
            block_size,
            block_alignment,
            stride,
            // Reversed so that block 0 is handed out first.
            free_list: RefCell::new((0..block_count).rev().collect()),
            occupied: RefCell::new(vec![false; block_count]),
            allocated_count: Cell::new(0),
            capacity: block_count,
        })
    }

    /// Returns the total number of blocks.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usable bytes per block.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Maximum alignment a block satisfies.
    #[inline]
    #[must_use]
    pub const fn block_alignment(&self) -> usize {
        self.block_alignment
    }

    /// Returns the number of currently allocated blocks.
    #[inline]
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated_count.get()
    }

    /// Returns the number of free blocks.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.capacity - self.allocated_count()
    }

    /// Marks every block free again.
    ///
    /// Values living in blocks are not dropped.
    pub fn clear(&mut self) {
        let free_list = self.free_list.get_mut();
        free_list.clear();
        free_list.extend((0..self.capacity).rev());
        self.occupied.get_mut().fill(false);
        self.allocated_count.set(0);
    }
}

impl Arena for PoolArena {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        if !request.is_valid()
            || request.size > self.block_size
            || request.alignment > self.block_alignment
        {
            return None;
        }

        let index = self.free_list.borrow_mut().pop()?;
        self.occupied.borrow_mut()[index] = true;
        self.allocated_count.set(self.allocated_count.get() + 1);

        Some(self.region.at(index * self.stride))
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };

        let offset = self.region.offset_of(ptr);
        debug_assert!(offset.is_some(), "pointer does not belong to this pool");
        let Some(offset) = offset else { return };
        debug_assert_eq!(offset % self.stride, 0, "pointer is not at a block boundary");

        let index = offset / self.stride;
        let mut occupied = self.occupied.borrow_mut();
        debug_assert!(occupied[index], "pool block {index} freed twice");
        if !occupied[index] {
            return;
        }

        occupied[index] = false;
        self.free_list.borrow_mut().push(index);
        self.allocated_count.set(self.allocated_count.get() - 1);
    }
}

impl std::fmt::Debug for PoolArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolArena")
            .field("block_size", &self.block_size)
            .field("block_alignment", &self.block_alignment)
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_count())
            .finish()
    }
}
