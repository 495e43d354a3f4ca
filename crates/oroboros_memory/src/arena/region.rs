//! Fixed backing region shared by the linear, stack and pool arenas.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};

/// Alignment of a region's base address when the owner has no preference.
pub(crate) const DEFAULT_REGION_ALIGNMENT: usize = 16;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// A block of memory obtained once from the system allocator and released
/// when dropped.
pub(crate) struct Region {
    base: NonNull<u8>,
    layout: Layout,
}

impl Region {
    /// Allocates `size` bytes with the base aligned to `alignment`.
    pub(crate) fn new(size: usize, alignment: usize) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ZeroCapacity);
        }
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| MemoryError::CapacityOverflow { count: 1, size })?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        let base = NonNull::new(ptr).ok_or(MemoryError::BackingAllocationFailed { size })?;

        Ok(Self { base, layout })
    }

    /// Size of the region in bytes.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    /// Address of the first byte.
    #[inline]
    pub(crate) fn address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Offset of `ptr` from the base, if `ptr` lies inside the region.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        (ptr.as_ptr() as usize)
            .checked_sub(self.address())
            .filter(|offset| *offset < self.size())
    }

    /// Pointer `offset` bytes past the base.
    #[inline]
    pub(crate) fn at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.size(), "offset {offset} outside region of {} bytes", self.size());
        // SAFETY: offset is in bounds of the allocation, so the result is
        // non-null and derived from `base`.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: base was allocated in `new` with exactly this layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}

// SAFETY: Region exclusively owns its allocation; moving it to another thread
// moves that ownership.
unsafe impl Send for Region {}
