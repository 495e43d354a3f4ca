//! # OROBOROS Memory
//!
//! Pluggable memory arenas for every engine subsystem that needs raw memory
//! (resources, meshes, render primitives, material tables).
//!
//! ## Architecture Rules
//!
//! 1. **One interface** - Subsystems only ever see the [`Arena`] trait
//! 2. **Failure is a value** - `allocate` returns `None`, it never panics
//! 3. **Construct after allocate** - Typed helpers build values only once
//!    memory is secured, and destroy them before memory goes back
//! 4. **Provenance everywhere** - Every request carries the file and line
//!    that made it
//!
//! ## Layers
//!
//! ```text
//! ArenaBox / ArenaArray        (owned handles, destruct-then-free on drop)
//!         │
//! new_one / delete_one         (typed construction helpers)
//! new_array / delete_array
//!         │
//! Arena trait                  (allocate / free + AllocationRequest)
//!         │
//! Heap | Null | Linear | Stack | Pool | Tracking | Locked | Mock
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_memory::{delete_one, new_one, HeapArena, NullArena, Provenance};
//!
//! let heap = HeapArena::new();
//! let ptr = new_one(&heap, 4, Provenance::new("f", 1), || 42_i32).unwrap();
//! assert_eq!(unsafe { *ptr.as_ptr() }, 42);
//! unsafe { delete_one(&heap, Some(ptr)) };
//!
//! // The null arena drives the failure path deterministically.
//! let null = NullArena::new();
//! assert!(new_one(&null, 4, Provenance::new("f", 1), || 42_i32).is_none());
//! ```
//!
//! ## Thread Safety
//!
//! Arenas are not thread-safe unless they say so. Wrap one in a
//! [`LockedArena`] to share it between threads.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arena;
pub mod config;
pub mod construct;
pub mod error;
pub mod handle;
pub mod provenance;

pub use arena::{
    AllocateCall, Arena, HeapArena, LinearArena, LockedArena, MockArena, MockEvent, NullArena,
    Outstanding, PoolArena, StackArena, StackMarker, TrackingArena, TrackingStats,
};
pub use config::{ArenaConfig, ArenaKind};
pub use construct::{delete_array, delete_one, new_array, new_array_zeroed, new_one};
pub use error::{MemoryError, MemoryResult};
pub use handle::{ArenaArray, ArenaBox};
pub use provenance::{AllocationRequest, Category, Provenance};
