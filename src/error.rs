//! Allocation errors
//!
//! Every variant is plain data, so an error can be built and returned from inside a signal
//! handler without touching the heap.

use thiserror::Error;

/// The reason an allocation could not be satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum AllocError {
    /// The allocator has no memory left for a block of this size.
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory {
        /// Total bytes asked of the allocator, header included.
        requested: usize,
    },

    /// The payload size plus the header, or the element count times the element size, does not
    /// fit in a `usize`.
    #[error("allocation size overflows usize: requested {requested} bytes")]
    SizeOverflow {
        /// The payload size the caller asked for, before the header was added.  Saturates to
        /// `usize::MAX` when the element count times the element size was what overflowed.
        requested: usize,
    },

    /// The type needs a stricter alignment than a payload can promise.
    #[error("unsupported alignment: {align} bytes")]
    UnsupportedAlignment {
        /// The alignment the type asked for.
        align: usize,
    },
}
