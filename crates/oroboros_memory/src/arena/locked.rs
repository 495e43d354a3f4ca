//! # Locked Arena
//!
//! Mutex wrapper that makes any `Send` arena shareable between threads.

use std::ptr::NonNull;

use parking_lot::Mutex;

use super::Arena;
use crate::provenance::AllocationRequest;

/// An arena guarded by a [`parking_lot::Mutex`].
///
/// Every `allocate` and `free` takes the lock for the duration of the call,
/// so `LockedArena<A>` is `Sync` whenever `A` is `Send`. Pointers handed out
/// are still owned by the caller that received them.
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{ArenaBox, HeapArena, LockedArena};
///
/// let arena = LockedArena::new(HeapArena::new());
/// std::thread::scope(|scope| {
///     for i in 0..4_u32 {
///         let arena = &arena;
///         scope.spawn(move || {
///             let value = ArenaBox::new_in(i, arena).unwrap();
///             assert_eq!(*value, i);
///         });
///     }
/// });
/// assert_eq!(arena.with(HeapArena::live_allocations), 0);
/// ```
#[derive(Debug, Default)]
pub struct LockedArena<A> {
    inner: Mutex<A>,
}

impl<A: Arena> LockedArena<A> {
    /// Wraps `inner`.
    pub fn new(inner: A) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Runs `f` on the inner arena while holding the lock.
    ///
    /// Only shared access is handed out: resets need `&mut A`, and handles
    /// may still borrow `self`. Calling back into this arena from `f`
    /// deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        let guard = self.inner.lock();
        f(&*guard)
    }

    /// Mutable access to the inner arena, e.g. to reset it.
    ///
    /// The exclusive borrow proves no handle still points into the arena.
    pub fn get_mut(&mut self) -> &mut A {
        self.inner.get_mut()
    }

    /// Unwraps the inner arena.
    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}

impl<A: Arena> Arena for LockedArena<A> {
    #[inline]
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(request)
    }

    #[inline]
    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        if ptr.is_none() {
            return;
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().free(ptr) }
    }
}
