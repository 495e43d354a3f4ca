//! # Owned Arena Handles
//!
//! [`ArenaBox`] and [`ArenaArray`] bind a constructed value to the arena
//! that produced it. Dropping the handle runs the destruct-then-free sequence
//! on every exit path, and the free can only ever go to the right arena.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, align_of};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use bytemuck::Zeroable;

use crate::arena::Arena;
use crate::construct::{delete_array, delete_one, new_array, new_array_zeroed, new_one, BlockGuard};
use crate::provenance::Provenance;

/// A single value living in an arena, owned like a `Box`.
///
/// Associated functions take `this` instead of `self` so they never shadow
/// methods of `T`.
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{ArenaBox, HeapArena};
///
/// let arena = HeapArena::new();
/// let mut name = ArenaBox::new_in(String::from("mesh"), &arena).unwrap();
/// name.push_str("_lod0");
/// assert_eq!(*name, "mesh_lod0");
/// drop(name);
/// assert_eq!(arena.live_allocations(), 0);
/// ```
pub struct ArenaBox<'a, T, A: Arena + ?Sized> {
    ptr: NonNull<T>,
    arena: &'a A,
    _owns: PhantomData<T>,
}

impl<'a, T, A: Arena + ?Sized> ArenaBox<'a, T, A> {
    /// Moves `value` into `arena`, recording the caller as provenance.
    ///
    /// Returns `None` (dropping `value`) if the arena refuses.
    #[track_caller]
    pub fn new_in(value: T, arena: &'a A) -> Option<Self> {
        Self::new_aligned(arena, align_of::<T>(), Provenance::caller(), || value)
    }

    /// Constructs a value with `init` only once memory is secured,
    /// recording the caller as provenance.
    #[track_caller]
    pub fn new_with(arena: &'a A, init: impl FnOnce() -> T) -> Option<Self> {
        Self::new_aligned(arena, align_of::<T>(), Provenance::caller(), init)
    }

    /// Full form: explicit alignment and provenance. See [`new_one`].
    pub fn new_aligned(
        arena: &'a A,
        alignment: usize,
        provenance: Provenance,
        init: impl FnOnce() -> T,
    ) -> Option<Self> {
        let ptr = new_one(arena, alignment, provenance, init)?;
        Some(Self {
            ptr,
            arena,
            _owns: PhantomData,
        })
    }

    /// Rebuilds a handle from a pointer produced by [`new_one`] or
    /// [`ArenaBox::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must hold a live `T` allocated from `arena` and owned by no one
    /// else.
    pub unsafe fn from_raw(ptr: NonNull<T>, arena: &'a A) -> Self {
        Self {
            ptr,
            arena,
            _owns: PhantomData,
        }
    }

    /// Gives up ownership without destroying the value.
    ///
    /// Release it later with [`delete_one`] on the same arena, or rebuild the
    /// handle with [`ArenaBox::from_raw`].
    #[must_use = "the value leaks unless the pointer is deleted"]
    pub fn into_raw(this: Self) -> NonNull<T> {
        let ptr = this.ptr;
        mem::forget(this);
        ptr
    }

    /// Moves the value out and returns the memory to the arena.
    pub fn into_inner(this: Self) -> T {
        let (ptr, arena) = (this.ptr, this.arena);
        mem::forget(this);

        let block = BlockGuard::new(arena, ptr.cast());
        // SAFETY: the handle owned a live `T`; it is read exactly once and
        // the block is freed without dropping it again.
        let value = unsafe { ptr.as_ptr().read() };
        drop(block);
        value
    }

    /// Never frees the value; it lives as long as the arena borrow.
    pub fn leak(this: Self) -> &'a mut T {
        // SAFETY: the value is never freed, and the block stays valid while
        // `arena` is borrowed for `'a`.
        unsafe { &mut *Self::into_raw(this).as_ptr() }
    }

    /// Address of the value.
    #[must_use]
    pub fn as_ptr(this: &Self) -> NonNull<T> {
        this.ptr
    }

    /// The arena the value lives in.
    #[must_use]
    pub fn arena(this: &Self) -> &'a A {
        this.arena
    }
}

impl<T, A: Arena + ?Sized> Deref for ArenaBox<'_, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the handle owns a live `T`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: Arena + ?Sized> DerefMut for ArenaBox<'_, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the handle owns a live `T` exclusively.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, A: Arena + ?Sized> Drop for ArenaBox<'_, T, A> {
    fn drop(&mut self) {
        // SAFETY: the handle owns a live `T` allocated from `arena`.
        unsafe { delete_one(self.arena, Some(self.ptr)) }
    }
}

impl<T: fmt::Debug, A: Arena + ?Sized> fmt::Debug for ArenaBox<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display, A: Arena + ?Sized> fmt::Display for ArenaBox<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// A fixed-length array living in an arena.
///
/// Remembers its length so [`delete_array`] always gets the right count.
/// Dereferences to a slice.
pub struct ArenaArray<'a, T, A: Arena + ?Sized> {
    ptr: NonNull<T>,
    len: usize,
    arena: &'a A,
    _owns: PhantomData<T>,
}

impl<'a, T, A: Arena + ?Sized> ArenaArray<'a, T, A> {
    /// Builds `len` elements with `init(index)`, recording the caller as
    /// provenance.
    #[track_caller]
    pub fn from_fn_in(arena: &'a A, len: usize, init: impl FnMut(usize) -> T) -> Option<Self> {
        Self::new_aligned(arena, len, align_of::<T>(), Provenance::caller(), init)
    }

    /// Full form: explicit alignment and provenance. See [`new_array`].
    pub fn new_aligned(
        arena: &'a A,
        len: usize,
        alignment: usize,
        provenance: Provenance,
        init: impl FnMut(usize) -> T,
    ) -> Option<Self> {
        let ptr = new_array(arena, len, alignment, provenance, init)?;
        // SAFETY: `new_array` built `len` elements in `arena`.
        Some(unsafe { Self::from_raw_parts(ptr, len, arena) })
    }

    /// `len` all-zero elements, recording the caller as provenance.
    #[track_caller]
    pub fn zeroed_in(arena: &'a A, len: usize) -> Option<Self>
    where
        T: Zeroable,
    {
        let ptr = new_array_zeroed(arena, len, align_of::<T>(), Provenance::caller())?;
        // SAFETY: `new_array_zeroed` produced `len` valid elements in `arena`.
        Some(unsafe { Self::from_raw_parts(ptr, len, arena) })
    }

    /// Rebuilds a handle from raw parts.
    ///
    /// # Safety
    ///
    /// `ptr` must hold `len` live elements allocated together from `arena`
    /// and owned by no one else.
    pub unsafe fn from_raw_parts(ptr: NonNull<T>, len: usize, arena: &'a A) -> Self {
        Self {
            ptr,
            len,
            arena,
            _owns: PhantomData,
        }
    }

    /// Gives up ownership; release later with [`delete_array`].
    #[must_use = "the elements leak unless the pointer is deleted"]
    pub fn into_raw_parts(this: Self) -> (NonNull<T>, usize) {
        let parts = (this.ptr, this.len);
        mem::forget(this);
        parts
    }

    /// The arena the elements live in.
    #[must_use]
    pub fn arena(this: &Self) -> &'a A {
        this.arena
    }
}

impl<T, A: Arena + ?Sized> Deref for ArenaArray<'_, T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: `len` live, contiguous, aligned elements.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T, A: Arena + ?Sized> DerefMut for ArenaArray<'_, T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as in `deref`, and the handle is borrowed exclusively.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T, A: Arena + ?Sized> Drop for ArenaArray<'_, T, A> {
    fn drop(&mut self) {
        // SAFETY: the handle owns `len` live elements allocated from `arena`.
        unsafe { delete_array(self.arena, Some(self.ptr), self.len) }
    }
}

impl<T: fmt::Debug, A: Arena + ?Sized> fmt::Debug for ArenaArray<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{HeapArena, MockArena, NullArena, PoolArena};
    use std::cell::Cell;

    struct CountsDrops<'a>(&'a Cell<usize>);

    impl Drop for CountsDrops<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_box_records_caller() {
        let arena = MockArena::new();
        let (value, line) = (ArenaBox::new_in(5_u8, &arena).unwrap(), line!());
        let provenance = arena.allocate_calls()[0].request.provenance;
        assert_eq!(provenance.file(), file!());
        assert_eq!(provenance.line(), line);
        drop(value);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_box_drop_runs_destructor_once() {
        let drops = Cell::new(0);
        let arena = HeapArena::new();
        {
            let _value = ArenaBox::new_in(CountsDrops(&drops), &arena).unwrap();
            assert_eq!(drops.get(), 0);
        }
        assert_eq!(drops.get(), 1);
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn test_box_on_null_arena() {
        let arena = NullArena::new();
        let mut built = false;
        let value = ArenaBox::new_with(&arena, || {
            built = true;
            1_u32
        });
        assert!(value.is_none());
        assert!(!built);
    }

    #[test]
    fn test_box_into_inner_frees_without_dropping() {
        let drops = Cell::new(0);
        let arena = MockArena::new();
        let value = ArenaBox::new_in(CountsDrops(&drops), &arena).unwrap();

        let inner = ArenaBox::into_inner(value);
        assert_eq!(drops.get(), 0);
        assert_eq!(arena.free_count(), 1);

        drop(inner);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_box_raw_round_trip() {
        let arena = HeapArena::new();
        let value = ArenaBox::new_in(vec![1, 2, 3], &arena).unwrap();
        let ptr = ArenaBox::into_raw(value);
        assert_eq!(arena.live_allocations(), 1);

        let value = unsafe { ArenaBox::from_raw(ptr, &arena) };
        assert_eq!(*value, vec![1, 2, 3]);
        drop(value);
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn test_box_leak_lives_with_arena() {
        let arena = PoolArena::new(8, 8, 1).unwrap();
        let value = ArenaBox::leak(ArenaBox::new_in(9_u64, &arena).unwrap());
        *value += 1;
        assert_eq!(*value, 10);
        assert_eq!(arena.allocated_count(), 1);
    }

    #[test]
    fn test_array_handle() {
        let drops = Cell::new(0);
        let arena = MockArena::new();
        {
            let array = ArenaArray::from_fn_in(&arena, 6, |_| CountsDrops(&drops)).unwrap();
            assert_eq!(array.len(), 6);
        }
        assert_eq!(drops.get(), 6);
        assert_eq!(arena.allocate_count(), 1);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_array_slice_access() {
        let arena = HeapArena::new();
        let mut squares = ArenaArray::from_fn_in(&arena, 5, |i| i * i).unwrap();
        squares[0] = 100;
        assert_eq!(&*squares, &[100, 1, 4, 9, 16]);
        assert_eq!(format!("{squares:?}"), "[100, 1, 4, 9, 16]");
    }

    #[test]
    fn test_zeroed_array_handle() {
        let arena = HeapArena::new();
        let zeros = ArenaArray::<u32, _>::zeroed_in(&arena, 32).unwrap();
        assert!(zeros.iter().all(|v| *v == 0));
    }
}
