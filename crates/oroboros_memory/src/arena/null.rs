//! # Null Arena
//!
//! An arena that refuses every request. Used to drive the "out of memory"
//! path deterministically.

use std::cell::Cell;
use std::ptr::NonNull;

use super::Arena;
use crate::provenance::AllocationRequest;

/// Arena whose `allocate` always returns `None`.
///
/// `free` accepts anything and does nothing, since nothing was ever handed
/// out.
#[derive(Debug, Default)]
pub struct NullArena {
    refused: Cell<usize>,
}

impl NullArena {
    /// Creates a null arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            refused: Cell::new(0),
        }
    }

    /// Number of requests refused so far.
    #[must_use]
    pub fn refused(&self) -> usize {
        self.refused.get()
    }
}

impl Arena for NullArena {
    #[inline]
    fn allocate(&self, _request: &AllocationRequest) -> Option<NonNull<u8>> {
        self.refused.set(self.refused.get() + 1);
        None
    }

    #[inline]
    unsafe fn free(&self, _ptr: Option<NonNull<u8>>) {}
}
