//! # Memory Error Types
//!
//! Errors raised while *setting up* arenas (bad capacities, bad alignments,
//! bad configuration files). Allocation itself never produces an error: a
//! failed `allocate` returns `None` and the caller decides what to do.

use thiserror::Error;

/// Errors that can occur while constructing or configuring an arena.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// An alignment that is not a power of two.
    #[error("invalid alignment: {0} is not a power of two")]
    InvalidAlignment(usize),

    /// A region-backed arena was asked for zero bytes or zero blocks.
    #[error("arena capacity must be greater than zero")]
    ZeroCapacity,

    /// The requested region does not fit in the address space.
    #[error("capacity overflow: {count} blocks of {size} bytes")]
    CapacityOverflow {
        /// Number of blocks requested.
        count: usize,
        /// Size of each block in bytes.
        size: usize,
    },

    /// The system allocator refused the backing region.
    #[error("backing allocation of {size} bytes failed")]
    BackingAllocationFailed {
        /// Size of the refused region in bytes.
        size: usize,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for arena setup operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
