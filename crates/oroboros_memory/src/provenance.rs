//! # Allocation Provenance
//!
//! Call-site metadata threaded through every allocation request so that
//! diagnostic arenas can say *where* a leaked or corrupted block came from.

use std::alloc::Layout;
use std::fmt;
use std::panic::Location;

/// Source location of an allocation request.
///
/// Built explicitly with [`Provenance::new`], from the caller's location with
/// [`Provenance::caller`], or with the [`provenance!`](crate::provenance)
/// macro at the current line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Provenance {
    file: &'static str,
    line: u32,
}

impl Provenance {
    /// Provenance used when the origin of a request is not known.
    pub const UNKNOWN: Self = Self::new("<unknown>", 0);

    /// Creates a provenance record from a file name and line number.
    #[inline]
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Captures the location of the caller.
    ///
    /// Inside a `#[track_caller]` function this resolves to *that* function's
    /// caller, so helpers can forward the user's call site.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }

    /// Source file of the request.
    #[inline]
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Source line of the request.
    #[inline]
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Captures a [`Provenance`] for the line the macro is expanded on.
///
/// ```rust,ignore
/// let here = oroboros_memory::provenance!();
/// assert_eq!(here.file(), file!());
/// ```
#[macro_export]
macro_rules! provenance {
    () => {
        $crate::Provenance::new(file!(), line!())
    };
}

/// Optional tag describing what an allocation is for.
///
/// The typed helpers tag requests with the name of the constructed type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Category(&'static str);

impl Category {
    /// Creates a category from a static name.
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Category naming the type `T`.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>())
    }

    /// The category name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A single allocation request.
///
/// Transient: built per call to [`Arena::allocate`](crate::Arena::allocate)
/// and never retained by the framework. Tracking and mock arenas copy it
/// for later inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Number of bytes requested. Must be greater than zero.
    pub size: usize,
    /// Required alignment of the returned address. Must be a power of two.
    pub alignment: usize,
    /// Optional tag, usually the name of the type being constructed.
    pub category: Option<Category>,
    /// Where the request was made.
    pub provenance: Provenance,
}

impl AllocationRequest {
    /// Creates an untagged request.
    #[inline]
    #[must_use]
    pub const fn new(size: usize, alignment: usize, provenance: Provenance) -> Self {
        Self {
            size,
            alignment,
            category: None,
            provenance,
        }
    }

    /// Returns the request tagged with `category`.
    #[inline]
    #[must_use]
    pub const fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Whether the request satisfies the interface preconditions:
    /// a non-zero size and a power-of-two alignment.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.size > 0 && self.alignment.is_power_of_two()
    }

    /// The request as a [`Layout`], or `None` if it is invalid or too large.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> Option<Layout> {
        if !self.is_valid() {
            return None;
        }
        Layout::from_size_align(self.size, self.alignment).ok()
    }
}
