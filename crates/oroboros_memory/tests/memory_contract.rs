//! Integration test for the typed construction contract.
//!
//! Every scenario runs over a range of alignments against a recording arena
//! and checks the exact calls the helpers make.

#![allow(unsafe_code)]

use oroboros_memory::{
    delete_array, delete_one, new_array, new_one, Category, HeapArena, MockArena, MockEvent,
    NullArena, Provenance,
};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;

const ALIGNMENTS: [usize; 9] = [1, 2, 4, 8, 16, 32, 64, 128, 256];

const AT: Provenance = Provenance::new("Test", 42);

/// Backing store aligned for the largest alignment under test.
#[repr(C, align(256))]
struct Buffer([u8; 512]);

impl Buffer {
    fn new() -> Self {
        Self([0; 512])
    }

    fn start(&mut self) -> NonNull<u8> {
        NonNull::from(&mut self.0).cast()
    }
}

/// Writes a note into the mock when dropped.
struct Noisy<'a> {
    arena: &'a MockArena<'a>,
}

impl Drop for Noisy<'_> {
    fn drop(&mut self) {
        self.arena.note("drop");
    }
}

#[test]
fn test_raw_pointer_one() {
    for alignment in ALIGNMENTS {
        let mut buffer = Buffer::new();
        let start = buffer.start();
        let arena = MockArena::with_buffer(&mut buffer.0);

        let ptr = new_one(&arena, alignment, AT, || 42_i32).unwrap();
        assert_eq!(ptr.cast::<u8>(), start);
        assert_eq!(unsafe { *ptr.as_ptr() }, 42);
        unsafe { delete_one(&arena, Some(ptr)) };

        let calls = arena.allocate_calls();
        assert_eq!(calls.len(), 1);
        let request = calls[0].request;
        assert_eq!(request.size, 4);
        assert_eq!(request.alignment, alignment);
        assert_eq!(request.category, Some(Category::of::<i32>()));
        assert_eq!(request.provenance.file(), "Test");
        assert_eq!(request.provenance.line(), 42);
        assert_eq!(arena.free_calls(), vec![Some(start)]);
    }
}

#[test]
fn test_raw_pointer_one_twice() {
    for alignment in ALIGNMENTS {
        let mut buffer = Buffer::new();
        let start = buffer.start();
        let arena = MockArena::with_buffer(&mut buffer.0);

        for value in [1_i32, 2] {
            let ptr = new_one(&arena, alignment, AT, || value).unwrap();
            assert_eq!(unsafe { *ptr.as_ptr() }, value);
            unsafe { delete_one(&arena, Some(ptr)) };
        }

        assert_eq!(arena.allocate_count(), 2);
        assert!(arena
            .allocate_calls()
            .iter()
            .all(|call| call.request.alignment == alignment && call.request.provenance == AT));
        assert_eq!(arena.free_calls(), vec![Some(start), Some(start)]);
    }
}

#[test]
fn test_raw_pointer_null() {
    for alignment in ALIGNMENTS {
        let arena = MockArena::new();
        arena.fail_all(true);
        let constructed = Cell::new(false);

        let ptr = new_one(&arena, alignment, AT, || {
            constructed.set(true);
            42_i32
        });
        assert!(ptr.is_none());
        assert!(!constructed.get());

        unsafe { delete_one(&arena, ptr) };
        assert_eq!(arena.allocate_count(), 1);
        assert_eq!(arena.free_count(), 0);
    }
}

#[test]
fn test_raw_pointer_destructor_before_free() {
    for alignment in ALIGNMENTS {
        let mut buffer = Buffer::new();
        let arena = MockArena::with_buffer(&mut buffer.0);

        let ptr = new_one(&arena, alignment, AT, || Noisy { arena: &arena }).unwrap();
        unsafe { delete_one(&arena, Some(ptr)) };

        let events = arena.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], MockEvent::Allocate(call) if call.result.is_some()));
        assert_eq!(events[1], MockEvent::Note("drop"));
        assert!(matches!(events[2], MockEvent::Free(Some(_))));
    }
}

#[test]
fn test_array_request_and_order() {
    for alignment in ALIGNMENTS {
        let mut buffer = Buffer::new();
        let start = buffer.start();
        let arena = MockArena::with_buffer(&mut buffer.0);

        let ptr = new_array(&arena, 3, alignment, AT, |i| [0, 10, 20][i]).unwrap();
        let values = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 3) };
        assert_eq!(values, &[0, 10, 20]);
        unsafe { delete_array(&arena, Some(ptr), 3) };

        let request = arena.allocate_calls()[0].request;
        assert_eq!(request.size, 12);
        assert_eq!(request.alignment, alignment);
        assert_eq!(request.provenance, AT);
        assert_eq!(arena.free_calls(), vec![Some(start)]);
    }
}

#[test]
fn test_invalid_requests_never_reach_the_arena() {
    let arena = MockArena::new();

    assert!(new_one(&arena, 3, AT, || 1_i32).is_none());
    assert!(new_array(&arena, usize::MAX, 8, AT, |_| 0_u64).is_none());
    assert_eq!(arena.allocate_count(), 0);
}

#[test]
fn test_panicking_constructor_frees_block() {
    let arena = MockArena::new();

    let result = catch_unwind(AssertUnwindSafe(|| {
        new_one::<i32, _>(&arena, 4, AT, || panic!("constructor failed"))
    }));
    assert!(result.is_err());
    assert_eq!(arena.allocate_count(), 1);
    assert_eq!(arena.free_count(), 1);
}

#[test]
fn test_heap_arena_round_trip() {
    let arena = HeapArena::new();

    let ptr = new_one(&arena, 4, AT, || 42_i32).unwrap();
    assert_eq!(ptr.as_ptr() as usize % 4, 0);
    assert_eq!(unsafe { *ptr.as_ptr() }, 42);
    assert_eq!(arena.live_allocations(), 1);

    unsafe { delete_one(&arena, Some(ptr)) };
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn test_null_arena_never_constructs() {
    let arena = NullArena::new();
    let constructed = Cell::new(false);

    let ptr = new_one(&arena, 8, AT, || {
        constructed.set(true);
        7_u64
    });
    assert!(ptr.is_none());
    assert!(!constructed.get());

    unsafe { delete_one(&arena, ptr) };
    assert_eq!(arena.refused(), 1);
}
