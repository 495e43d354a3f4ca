//! # Mock Arena
//!
//! A test double that records every call made through the [`Arena`]
//! interface and can be scripted to fail. Lets tests assert call patterns
//! of the typed helpers without exhausting real memory.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::{Arena, HeapArena};
use crate::provenance::AllocationRequest;

/// One recorded `allocate` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocateCall {
    /// Arguments of the call.
    pub request: AllocationRequest,
    /// What the mock returned.
    pub result: Option<NonNull<u8>>,
}

/// Everything observed by a [`MockArena`], in call order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockEvent {
    /// `allocate` was called.
    Allocate(AllocateCall),
    /// `free` was called with this pointer.
    Free(Option<NonNull<u8>>),
    /// A note recorded by test code through [`MockArena::note`].
    Note(&'static str),
}

/// Where the mock gets the memory it hands out.
enum Backing<'buf> {
    /// Real allocations from a private heap arena.
    Heap(HeapArena),
    /// One caller-supplied buffer, handed out while not already in use.
    Buffer {
        start: NonNull<u8>,
        len: usize,
        in_use: Cell<bool>,
        _buffer: PhantomData<&'buf mut [u8]>,
    },
}

/// Recording arena for tests.
///
/// By default the mock serves requests from an internal [`HeapArena`].
/// [`MockArena::with_buffer`] instead returns the start of a borrowed buffer
/// for every request that fits, refusing requests while the buffer is already
/// handed out.
///
/// Failures can be scripted per call with [`MockArena::fail_on_call`] or for
/// every call with [`MockArena::fail_all`]. Scripted failures are recorded
/// like any other call.
///
/// # Example
///
/// ```rust,ignore
/// use oroboros_memory::{delete_one, new_one, MockArena, Provenance};
///
/// let arena = MockArena::new();
/// arena.fail_on_call(1);
///
/// let first = new_one(&arena, 4, Provenance::new("Test", 42), || 1_i32);
/// let second = new_one(&arena, 4, Provenance::new("Test", 42), || 2_i32);
/// assert!(first.is_some());
/// assert!(second.is_none());
///
/// unsafe { delete_one(&arena, first) };
/// assert_eq!(arena.allocate_count(), 2);
/// assert_eq!(arena.free_count(), 1);
/// ```
pub struct MockArena<'buf> {
    backing: Backing<'buf>,
    events: RefCell<Vec<MockEvent>>,
    allocate_count: Cell<usize>,
    fail_on: RefCell<HashSet<usize>>,
    fail_all: Cell<bool>,
}

impl MockArena<'static> {
    /// Creates a heap-backed mock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backing(Backing::Heap(HeapArena::new()))
    }
}

impl Default for MockArena<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'buf> MockArena<'buf> {
    /// Creates a mock that hands out the start of `buffer`.
    ///
    /// A request succeeds when it fits in the buffer, the buffer start
    /// satisfies its alignment, and the buffer is not currently handed out.
    #[must_use]
    pub fn with_buffer(buffer: &'buf mut [u8]) -> Self {
        Self::with_backing(Backing::Buffer {
            start: NonNull::from(&mut *buffer).cast::<u8>(),
            len: buffer.len(),
            in_use: Cell::new(false),
            _buffer: PhantomData,
        })
    }

    fn with_backing(backing: Backing<'buf>) -> Self {
        Self {
            backing,
            events: RefCell::new(Vec::new()),
            allocate_count: Cell::new(0),
            fail_on: RefCell::new(HashSet::new()),
            fail_all: Cell::new(false),
        }
    }

    /// Makes the `call`-th `allocate` (zero-based) return `None`.
    pub fn fail_on_call(&self, call: usize) {
        self.fail_on.borrow_mut().insert(call);
    }

    /// Makes every subsequent `allocate` return `None` (or succeed again
    /// when `fail` is `false`).
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.set(fail);
    }

    /// Records a free-form note in the event log.
    ///
    /// Useful for interleaving observations (a destructor running, say)
    /// with the arena calls.
    pub fn note(&self, note: &'static str) {
        self.events.borrow_mut().push(MockEvent::Note(note));
    }

    /// Every event, in order.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.events.borrow().clone()
    }

    /// Every recorded `allocate` call, in order.
    #[must_use]
    pub fn allocate_calls(&self) -> Vec<AllocateCall> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                MockEvent::Allocate(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    /// Every pointer passed to `free`, in order.
    #[must_use]
    pub fn free_calls(&self) -> Vec<Option<NonNull<u8>>> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                MockEvent::Free(ptr) => Some(*ptr),
                _ => None,
            })
            .collect()
    }

    /// Number of `allocate` calls.
    #[must_use]
    pub fn allocate_count(&self) -> usize {
        self.allocate_count.get()
    }

    /// Number of `free` calls, `free(None)` included.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_calls().len()
    }

    /// Forgets every recorded event. Scripted failures are kept.
    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    fn serve(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        match &self.backing {
            Backing::Heap(heap) => heap.allocate(request),
            Backing::Buffer {
                start, len, in_use, ..
            } => {
                let fits = request.is_valid()
                    && request.size <= *len
                    && start.as_ptr() as usize % request.alignment == 0;
                if !fits || in_use.get() {
                    return None;
                }
                in_use.set(true);
                Some(*start)
            }
        }
    }

    fn release(&self, ptr: NonNull<u8>) {
        match &self.backing {
            // SAFETY: `Arena::free` callers guarantee `ptr` came from this
            // mock, and heap-backed mocks only hand out heap blocks.
            Backing::Heap(heap) => unsafe { heap.free(Some(ptr)) },
            Backing::Buffer { start, in_use, .. } => {
                debug_assert_eq!(ptr, *start, "pointer does not belong to this mock");
                in_use.set(false);
            }
        }
    }
}

impl Arena for MockArena<'_> {
    fn allocate(&self, request: &AllocationRequest) -> Option<NonNull<u8>> {
        let call = self.allocate_count.get();
        self.allocate_count.set(call + 1);

        let scripted_failure = self.fail_all.get() || self.fail_on.borrow().contains(&call);
        let result = if scripted_failure {
            None
        } else {
            self.serve(request)
        };

        tracing::trace!(
            call,
            size = request.size,
            alignment = request.alignment,
            ok = result.is_some(),
            "mock allocate"
        );
        self.events.borrow_mut().push(MockEvent::Allocate(AllocateCall {
            request: *request,
            result,
        }));
        result
    }

    unsafe fn free(&self, ptr: Option<NonNull<u8>>) {
        tracing::trace!(null = ptr.is_none(), "mock free");
        self.events.borrow_mut().push(MockEvent::Free(ptr));
        if let Some(ptr) = ptr {
            self.release(ptr);
        }
    }
}

impl std::fmt::Debug for MockArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockArena")
            .field("allocate_count", &self.allocate_count())
            .field("events", &self.events.borrow().len())
            .finish_non_exhaustive()
    }
}
