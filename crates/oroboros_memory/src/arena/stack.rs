//! # Stack Arena
//!
//! A LIFO allocator: space is reclaimed in the reverse order blocks were
//! handed out, by rewinding a top-of-stack offset.

use std::cell::Cell;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use super::region::{align_up, Region, DEFAULT_REGION_ALIGNMENT};
use super::Arena;
use crate::error::MemoryResult;
use crate::provenance::AllocationRequest;

/// Offset value meaning "no block".
const NO_BLOCK: usize = usize::MAX;

/// Bookkeeping stored immediately before every block.
#[derive(Clone, Copy)]
#[repr(C)]
struct BlockHeader {
    /// Top of the stack before this block was pushed.
    previous_top: usize,
    /// Offset of the block pushed before this one.
    previous_block: usize,
    /// Freed while blocks above it were still live.
    released: bool,
}

const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Position in a [`StackArena`] that can be rewound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackMarker {
    top: usize,
    last_block: usize,
}

/// A stack (LIFO) arena over a fixed region.
///
/// ```text
/// | header | pad | block A | header | pad | block B |  free ...  |
///                                                   ^ top
/// ```
///
/// Freeing the most recent block rewinds `top` to where it was before that
/// block was pushed. A block freed out of order is marked released in its
/// header and reclaimed as soon as every block above it has been freed.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe.
pub struct StackArena {
    region: Region,
    top: Cell<usize>,
    last_block: Cell<usize>,
    depth: Cell<usize>,
}

impl StackArena {
    /// Creates a stack arena with `capacity` bytes, headers included.
    ///
    /// # Errors
    ///
    /// Fails if `capacity` is zero or the backing region cannot be allocated.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        let region = Region::new(capacity, DEFAULT_REGION_ALIGNMENT)?;
        tracing::debug!(capacity, "stack arena created");
        Ok(Self {
            region,
            top: Cell::new(0),
            last_block: Cell::new(NO_BLOCK),
            depth: Cell::new(0),
        })
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Bytes in use, headers and padding included.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.top.get()
    }

    /// Number of live blocks. Released blocks still waiting under a live
    /// one are not counted.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Captures the current top of the stack.
    #[must_use]
    pub fn marker(&self) -> StackMarker {
        StackMarker {
            top: self.top.get(),
            last_block: self.last_block.get(),
        }
    }

    /// Releases every block pushed after `marker` was taken.
    ///
    /// Values living in those blocks are not dropped.
    pub fn rewind(&mut self, marker: StackMarker) {
        debug_assert!(marker.top <= self.top.get(), "marker is above the current top");
        while self.last_block.get() != marker.last_block && self.last_block.get() != NO_BLOCK {
            let header = self.header(self.last_block.get());
            self.last_block.set(header.previous_block);
            if !header.released {
                self.depth.set(self.depth.get() - 1);
            }
        }
        self.top.set(marker.top);
    }

    /// Releases every block.
    pub fn reset(&mut self) {
        self.top.set(0);
        self.last_block.set(NO_BLOCK);
        self.depth.set(0);
    }

    fn header(&self, block: usize) -> BlockHeader {
        let at = self.region.at(block - HEADER_SIZE);
        // SAFETY: every block is preceded by a header written in `allocate`.
        unsafe { ptr::read_unaligned(at.as_ptr().cast::<BlockHeader>()) }
    }

    fn write_header(&self, block: usize, header: BlockHeader) {
        let at = self.region.at(block - HEADER_SIZE);
        // SAFETY: `block - HEADER_SIZE` is the header slot reserved for
        // `block` in `allocate`, inside the region.
        unsafe { ptr::write_unaligned(at.as_ptr().cast::<BlockHeader>(), header) };
    }
}

impl Arena for StackArena {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        if !request.is_valid() {
            return None;
        }

        let base = self.region.address();
        let after_header = base.checked_add(self.top.get())?.checked_add(HEADER_SIZE)?;
        let block = align_up(after_header, request.alignment)? - base;
        let end = block.checked_add(request.size)?;

        if end > self.capacity() {
            return None;
        }

        // `block - HEADER_SIZE >= top`: the header lands in free space.
        self.write_header(
            block,
            BlockHeader {
                previous_top: self.top.get(),
                previous_block: self.last_block.get(),
                released: false,
            },
        );

        self.top.set(end);
        self.last_block.set(block);
        self.depth.set(self.depth.get() + 1);
        Some(self.region.at(block))
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        let block = self.region.offset_of(ptr);
        debug_assert!(block.is_some(), "pointer does not belong to this stack arena");
        let Some(block) = block else { return };

        let mut header = self.header(block);
        debug_assert!(!header.released, "stack block freed twice");
        if header.released {
            return;
        }
        header.released = true;
        self.write_header(block, header);
        self.depth.set(self.depth.get() - 1);

        // Pop the top while it is released, reclaiming out-of-order frees.
        while self.last_block.get() != NO_BLOCK {
            let top = self.header(self.last_block.get());
            if !top.released {
                break;
            }
            self.top.set(top.previous_top);
            self.last_block.set(top.previous_block);
        }
    }
}

impl std::fmt::Debug for StackArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("depth", &self.depth())
            .finish()
    }
}
