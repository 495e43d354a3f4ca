//! # Typed Construction
//!
//! Helpers that fuse raw arena allocation with value construction and
//! destruction:
//!
//! ```text
//! new_one:    allocate ──(None)──────────────▶ None, nothing constructed
//!                 │
//!                 └──(Some)──▶ init() ──▶ write ──▶ Some(ptr)
//!
//! delete_one: None ─────────────────────────▶ no-op
//!             Some(ptr) ──▶ drop_in_place ──▶ free
//! ```
//!
//! The constructor is a closure so that nothing is built before memory is
//! secured. If the closure panics the block goes back to the arena; if an
//! array element constructor panics the elements already built are dropped
//! in reverse order first.
//!
//! These functions never log, retry or abort: a `None` from the arena is
//! handed straight back to the caller.

#![allow(unsafe_code)]

use std::mem::{self, align_of, size_of};
use std::ptr::{self, NonNull};

use bytemuck::Zeroable;

use crate::arena::Arena;
use crate::provenance::{AllocationRequest, Category, Provenance};

/// Request for `size` bytes tagged with `T`'s name. Zero-sized requests are
/// rounded up to one byte.
#[inline]
fn typed_request<T>(size: usize, alignment: usize, provenance: Provenance) -> AllocationRequest {
    AllocationRequest::new(size.max(1), alignment, provenance).with_category(Category::of::<T>())
}

/// Allocates through `arena`, refusing a block that is not aligned for both
/// the request and `T`.
fn reserve<T, A: Arena + ?Sized>(arena: &A, request: &AllocationRequest) -> Option<NonNull<u8>> {
    let block = arena.allocate(request)?;
    if block.as_ptr() as usize % request.alignment.max(align_of::<T>()) != 0 {
        // SAFETY: the block was just returned by this arena and holds no value.
        unsafe { arena.free(Some(block)) };
        return None;
    }
    Some(block)
}

/// Returns a block to its arena when dropped, unless released.
pub(crate) struct BlockGuard<'a, A: Arena + ?Sized> {
    arena: &'a A,
    block: NonNull<u8>,
}

impl<'a, A: Arena + ?Sized> BlockGuard<'a, A> {
    /// Guards `block`, which must have come from `arena` and not be freed.
    pub(crate) fn new(arena: &'a A, block: NonNull<u8>) -> Self {
        Self { arena, block }
    }

    /// Disarms the guard.
    fn release(self) -> NonNull<u8> {
        let block = self.block;
        mem::forget(self);
        block
    }
}

impl<A: Arena + ?Sized> Drop for BlockGuard<'_, A> {
    fn drop(&mut self) {
        // SAFETY: the guard is only built around a live block of `arena`
        // whose value, if any, has been dropped or moved out.
        unsafe { self.arena.free(Some(self.block)) }
    }
}

/// Drops the constructed prefix of an array in reverse order and frees the
/// block, unless released.
struct ArrayGuard<'a, T, A: Arena + ?Sized> {
    arena: &'a A,
    base: NonNull<T>,
    initialized: usize,
}

impl<T, A: Arena + ?Sized> ArrayGuard<'_, T, A> {
    fn release(self) -> NonNull<T> {
        let base = self.base;
        mem::forget(self);
        base
    }
}

impl<T, A: Arena + ?Sized> Drop for ArrayGuard<'_, T, A> {
    fn drop(&mut self) {
        let block = BlockGuard::new(self.arena, self.base.cast());
        for index in (0..self.initialized).rev() {
            // SAFETY: elements `0..initialized` were written and not dropped.
            unsafe { ptr::drop_in_place(self.base.as_ptr().add(index)) };
        }
        drop(block);
    }
}

/// Allocates a `T` from `arena` and constructs it with `init`.
///
/// The request carries `alignment` and `provenance` unchanged and `T`'s type
/// name as its category. The returned block must also suit `T`: one aligned
/// below `max(alignment, align_of::<T>())` is freed and `None` is returned.
///
/// Returns `None` if `alignment` is not a power of two or the arena refuses
/// the request; `init` is not called in either case. On success a fully
/// constructed `T` lives at the returned address, which the caller owns
/// until it is passed to [`delete_one`] with the same arena.
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{delete_one, new_one, HeapArena, Provenance};
///
/// let arena = HeapArena::new();
/// let ptr = new_one(&arena, 4, Provenance::new("f", 1), || 42_i32).unwrap();
/// assert_eq!(unsafe { *ptr.as_ptr() }, 42);
/// unsafe { delete_one(&arena, Some(ptr)) };
/// ```
pub fn new_one<T, A>(
    arena: &A,
    alignment: usize,
    provenance: Provenance,
    init: impl FnOnce() -> T,
) -> Option<NonNull<T>>
where
    A: Arena + ?Sized,
{
    if !alignment.is_power_of_two() {
        return None;
    }
    let request = typed_request::<T>(size_of::<T>(), alignment, provenance);
    let block = BlockGuard::new(arena, reserve::<T, A>(arena, &request)?);

    let value = init();

    let ptr = block.release().cast::<T>();
    // SAFETY: the block holds at least `size_of::<T>()` bytes, is aligned
    // for `T` and is not initialised yet.
    unsafe { ptr.as_ptr().write(value) };
    Some(ptr)
}

/// Destroys the `T` at `ptr` and returns its memory to `arena`.
///
/// `None` is a no-op: no destructor runs and the arena is not called.
/// Otherwise the destructor runs exactly once, then `free` is called exactly
/// once, even if the destructor panics.
///
/// # Safety
///
/// `ptr` must be `None` or a pointer obtained from [`new_one`] with this same
/// arena, not yet deleted, whose value has not been moved out.
pub unsafe fn delete_one<T, A>(arena: &A, ptr: Option<NonNull<T>>)
where
    A: Arena + ?Sized,
{
    let Some(ptr) = ptr else { return };

    let block = BlockGuard::new(arena, ptr.cast());
    // SAFETY: the caller guarantees a live `T` at `ptr`.
    unsafe { ptr::drop_in_place(ptr.as_ptr()) };
    drop(block);
}

/// Allocates `count` contiguous `T`s from `arena` and constructs element `i`
/// with `init(i)`, in ascending order.
///
/// The request size is `count * size_of::<T>()`. Returns `None`, with no
/// element constructed, if the size overflows, `alignment` is not a power of
/// two or the arena refuses the request. The element count is not stored:
/// pass it back to [`delete_array`].
pub fn new_array<T, A>(
    arena: &A,
    count: usize,
    alignment: usize,
    provenance: Provenance,
    mut init: impl FnMut(usize) -> T,
) -> Option<NonNull<T>>
where
    A: Arena + ?Sized,
{
    let base = reserve_array::<T, A>(arena, count, alignment, provenance)?;

    let mut guard = ArrayGuard {
        arena,
        base,
        initialized: 0,
    };
    while guard.initialized < count {
        let value = init(guard.initialized);
        // SAFETY: `initialized < count`, so the slot is inside the block and
        // not initialised yet.
        unsafe { base.as_ptr().add(guard.initialized).write(value) };
        guard.initialized += 1;
    }
    Some(guard.release())
}

/// Allocates `count` contiguous `T`s whose bytes are all zero.
///
/// Same failure behaviour as [`new_array`]; free with [`delete_array`].
pub fn new_array_zeroed<T, A>(
    arena: &A,
    count: usize,
    alignment: usize,
    provenance: Provenance,
) -> Option<NonNull<T>>
where
    T: Zeroable,
    A: Arena + ?Sized,
{
    let base = reserve_array::<T, A>(arena, count, alignment, provenance)?;
    // SAFETY: the block holds `count` slots of `T`, and the all-zero bit
    // pattern is a valid `T` because `T: Zeroable`.
    unsafe { ptr::write_bytes(base.as_ptr(), 0, count) };
    Some(base)
}

fn reserve_array<T, A: Arena + ?Sized>(
    arena: &A,
    count: usize,
    alignment: usize,
    provenance: Provenance,
) -> Option<NonNull<T>> {
    if !alignment.is_power_of_two() {
        return None;
    }
    let size = size_of::<T>().checked_mul(count)?;
    let request = typed_request::<T>(size, alignment, provenance);
    if request.layout().is_none() {
        return None;
    }
    reserve::<T, A>(arena, &request).map(NonNull::cast)
}

/// Destroys `count` elements at `ptr` in descending index order, then
/// returns the block to `arena`.
///
/// `None` is a no-op: no destructor runs and the arena is not called.
///
/// # Safety
///
/// `ptr` must be `None` or a pointer obtained from [`new_array`] or
/// [`new_array_zeroed`] with this same arena and this same `count`, not yet
/// deleted.
pub unsafe fn delete_array<T, A>(arena: &A, ptr: Option<NonNull<T>>, count: usize)
where
    A: Arena + ?Sized,
{
    let Some(base) = ptr else { return };

    let block = BlockGuard::new(arena, base.cast());
    for index in (0..count).rev() {
        // SAFETY: the caller guarantees `count` live elements at `base`.
        unsafe { ptr::drop_in_place(base.as_ptr().add(index)) };
    }
    drop(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{HeapArena, MockArena, MockEvent, NullArena};
    use std::cell::RefCell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    const AT: Provenance = Provenance::new("Test", 42);

    /// Records its index in a shared log when dropped.
    struct Tracer<'a> {
        index: usize,
        log: &'a RefCell<Vec<usize>>,
    }

    impl Drop for Tracer<'_> {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.index);
        }
    }

    #[repr(C, align(64))]
    struct Buffer([u8; 128]);

    #[test]
    fn test_alignment_passed_through_unchanged() {
        let mut buffer = Buffer([0; 128]);
        let arena = MockArena::with_buffer(&mut buffer.0);
        let ptr = new_one(&arena, 1, AT, || 7_u64).unwrap();
        assert_eq!(arena.allocate_calls()[0].request.alignment, 1);
        assert_eq!(unsafe { *ptr.as_ptr() }, 7);
        unsafe { delete_one(&arena, Some(ptr)) };
    }

    #[test]
    fn test_block_misaligned_for_type_is_returned() {
        let mut buffer = Buffer([0; 128]);
        let arena = MockArena::with_buffer(&mut buffer.0[1..]);
        assert!(new_one(&arena, 1, AT, || 7_u64).is_none());
        assert_eq!(arena.allocate_count(), 1);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_invalid_alignment_never_reaches_arena() {
        let arena = MockArena::new();
        assert!(new_one(&arena, 3, AT, || 1_u8).is_none());
        assert!(new_array(&arena, 4, 0, AT, |i| i).is_none());
        assert_eq!(arena.allocate_count(), 0);
    }

    #[test]
    fn test_request_is_tagged_with_type() {
        let arena = MockArena::new();
        let ptr = new_one(&arena, 8, AT, || [0_u16; 5]).unwrap();
        let call = arena.allocate_calls()[0];
        assert_eq!(call.request.size, 10);
        assert_eq!(call.request.category, Some(Category::of::<[u16; 5]>()));
        assert_eq!(call.request.provenance, AT);
        unsafe { delete_one(&arena, Some(ptr)) };
    }

    #[test]
    fn test_zero_sized_type() {
        let arena = HeapArena::new();
        let ptr = new_one(&arena, 1, AT, || ()).unwrap();
        assert_eq!(arena.live_bytes(), 1);
        unsafe { delete_one(&arena, Some(ptr)) };
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn test_panicking_constructor_returns_memory() {
        let arena = MockArena::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            new_one::<u32, _>(&arena, 4, AT, || panic!("constructor failed"))
        }));
        assert!(result.is_err());
        assert_eq!(arena.allocate_count(), 1);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_array_construct_and_destruct_order() {
        let arena = MockArena::new();
        let built = RefCell::new(Vec::new());
        let dropped = RefCell::new(Vec::new());

        let ptr = new_array(&arena, 4, 8, AT, |index| {
            built.borrow_mut().push(index);
            Tracer { index, log: &dropped }
        });
        assert_eq!(*built.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(arena.allocate_calls()[0].request.size, 4 * size_of::<Tracer<'_>>());

        unsafe { delete_array(&arena, ptr, 4) };
        assert_eq!(*dropped.borrow(), vec![3, 2, 1, 0]);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_array_partial_construction_unwinds() {
        let arena = MockArena::new();
        let dropped = RefCell::new(Vec::new());

        let result = catch_unwind(AssertUnwindSafe(|| {
            new_array(&arena, 5, 8, AT, |index| {
                assert!(index < 3, "element {index} failed");
                Tracer { index, log: &dropped }
            })
        }));

        assert!(result.is_err());
        assert_eq!(*dropped.borrow(), vec![2, 1, 0]);
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_array_size_overflow_is_refused() {
        let arena = MockArena::new();
        assert!(new_array(&arena, usize::MAX, 8, AT, |_| 0_u64).is_none());
        assert!(new_array_zeroed::<u64, _>(&arena, usize::MAX / 4, 8, AT).is_none());
        assert_eq!(arena.allocate_count(), 0);
    }

    #[test]
    fn test_array_on_null_arena_builds_nothing() {
        let arena = NullArena::new();
        let mut calls = 0;
        assert!(new_array(&arena, 8, 8, AT, |i| {
            calls += 1;
            i
        })
        .is_none());
        assert_eq!(calls, 0);
        unsafe { delete_array::<usize, _>(&arena, None, 8) };
    }

    #[test]
    fn test_zeroed_array() {
        let arena = HeapArena::new();
        let ptr = new_array_zeroed::<[f32; 3], _>(&arena, 16, 16, AT).unwrap();
        let slice = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 16) };
        assert!(slice.iter().all(|v| *v == [0.0; 3]));
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        unsafe { delete_array(&arena, Some(ptr), 16) };
        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn test_empty_array() {
        let arena = MockArena::new();
        let ptr = new_array(&arena, 0, 4, AT, |_| 0_u32);
        assert!(ptr.is_some());
        assert_eq!(arena.allocate_calls()[0].request.size, 1);
        unsafe { delete_array(&arena, ptr, 0) };
        assert_eq!(arena.free_count(), 1);
    }

    #[test]
    fn test_delete_none_touches_nothing() {
        let arena = MockArena::new();
        unsafe {
            delete_one::<u32, _>(&arena, None);
            delete_array::<u32, _>(&arena, None, 3);
        }
        assert!(arena.events().is_empty());
    }

    #[test]
    fn test_destructor_runs_before_free() {
        struct Noisy<'a>(&'a MockArena<'static>);
        impl Drop for Noisy<'_> {
            fn drop(&mut self) {
                self.0.note("drop");
            }
        }

        let arena = MockArena::new();
        let ptr = new_one(&arena, 8, AT, || Noisy(&arena));
        unsafe { delete_one(&arena, ptr) };

        let events = arena.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], MockEvent::Note("drop"));
        assert_eq!(events[2], MockEvent::Free(ptr.map(NonNull::cast)));
    }
}
