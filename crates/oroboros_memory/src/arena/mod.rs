//! # Arenas
//!
//! The [`Arena`] trait and its backing strategies.
//!
//! ## Design Philosophy
//!
//! Every subsystem that needs raw memory talks to `Arena` and nothing else.
//! Swapping the heap arena for a pool or stack arena requires no change above
//! this layer.
//!
//! | Arena | Strategy | `free` |
//! |---|---|---|
//! | [`HeapArena`] | system allocator | returns memory to the system |
//! | [`NullArena`] | always refuses | no-op |
//! | [`LinearArena`] | bump pointer | no-op, memory returns on `reset` |
//! | [`StackArena`] | LIFO bump pointer | rewinds the top block |
//! | [`PoolArena`] | fixed-size blocks | pushes the block on the free list |
//! | [`TrackingArena`] | wraps any arena | records outstanding blocks |
//! | [`LockedArena`] | wraps any arena | serialises access with a mutex |
//! | [`MockArena`] | test double | records calls, scripted failures |
//!
//! ## Thread Safety
//!
//! The trait promises nothing about concurrent use. An arena that wants to be
//! shared across threads provides its own synchronisation, as
//! [`LockedArena`] does.

#![allow(unsafe_code)]

mod heap;
mod linear;
mod locked;
mod mock;
mod null;
mod pool;
mod region;
mod stack;
mod tracking;

pub use heap::HeapArena;
pub use linear::LinearArena;
pub use locked::LockedArena;
pub use mock::{AllocateCall, MockArena, MockEvent};
pub use null::NullArena;
pub use pool::PoolArena;
pub use stack::{StackArena, StackMarker};
pub use tracking::{Outstanding, TrackingArena, TrackingStats};

use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use crate::provenance::{AllocationRequest, Category, Provenance};

/// A pluggable allocation strategy.
///
/// `allocate` hands out raw, uninitialised memory; `free` takes it back.
/// Failure is reported exclusively through `None`: an arena never panics
/// because it ran out of memory.
///
/// Methods take `&self` so that several live handles can borrow the same
/// arena; stateful arenas use interior mutability.
pub trait Arena {
    /// Reserves `request.size` bytes aligned to `request.alignment`.
    ///
    /// Returns `None` if the arena cannot satisfy the request, including when
    /// the request itself is invalid (zero size, non power-of-two alignment).
    /// A returned address is always a multiple of `request.alignment`.
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>>;

    /// Releases memory previously obtained from [`Arena::allocate`].
    ///
    /// `free(None)` is always a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a pointer returned by `allocate` on this same
    /// arena instance that has not been freed yet. Any value living in the
    /// block must already have been dropped or moved out.
    unsafe fn free(&self, ptr: Option<NonNull<u8>>);

    /// Convenience form of [`Arena::allocate`] taking the request fields
    /// one by one.
    fn allocate_raw(
        &self,
        size: usize,
        alignment: usize,
        category: Option<Category>,
        provenance: Provenance,
    ) -> Option<NonNull<u8>> {
        self.allocate(&AllocationRequest {
            size,
            alignment,
            category,
            provenance,
        })
    }
}

impl<A: Arena + ?Sized> Arena for &A {
    #[inline]
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        (**self).allocate(request)
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr) }
    }
}

impl<A: Arena + ?Sized> Arena for Box<A> {
    #[inline]
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        (**self).allocate(request)
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr) }
    }
}

impl<A: Arena + ?Sized> Arena for Rc<A> {
    #[inline]
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        (**self).allocate(request)
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr) }
    }
}

impl<A: Arena + ?Sized> Arena for Arc<A> {
    #[inline]
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        (**self).allocate(request)
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr) }
    }
}
