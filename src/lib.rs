//! Allocation that is safe to use while interrupting arbitrary code
//!
//! Crash reporters run inside signal handlers, where the process's ordinary allocator may be in
//! the middle of an operation and must not be reentered.  This crate lets that code create and
//! destroy objects using whichever reentrancy-safe allocator the call site picks, without every
//! release site having to remember which allocator that was.
//!
//! # How to use it
//!
//! ## Allocators
//!
//! Memory comes from an [`AsyncAllocator`]: a page pool, a pre-mapped arena, or whatever else
//! can hand out bytes without locks.  See the [`allocator`] module docs for an example.
//!
//! ## Allocating things
//!
//! ```no_run
//! use async_safe_alloc::{AsyncAllocatable, StderrSink};
//! # use async_safe_alloc::test_allocator::MallocAllocator as MyPageAllocator;
//!
//! static ADAPTER: AsyncAllocatable<StderrSink> = AsyncAllocatable::new(StderrSink);
//!
//! let pages = MyPageAllocator;
//! match ADAPTER.new_box(&pages, [0u64; 32]) {
//!     Ok(mut frames) => frames[0] = 0x1000,
//!     // Already reported to stderr; carry on without the optional feature
//!     Err(_) => {}
//! }
//! ```
//!
//! ## How it works
//!
//! Every block carries a small header holding a pointer back to its allocator:
//! `[header][payload]`.  The caller only ever sees the payload pointer; on release the header
//! is read back from just before it, and the block is returned to the allocator it names.
//! Arrays get one header for the whole block.

#![warn(missing_docs,
        missing_debug_implementations,
        trivial_casts, trivial_numeric_casts,
        unused_import_braces, unused_qualifications)]

#[macro_use]
mod macros;
pub mod adapter;
pub mod allocator;
pub mod boxed;
pub mod diagnostics;
pub mod error;
pub mod header;

pub mod test_allocator;

pub use adapter::AsyncAllocatable;
pub use allocator::{AsyncAllocator, NoMemory};
pub use boxed::AsyncBox;
pub use diagnostics::{DiagnosticSink, NullSink, StderrSink};
pub use error::AllocError;
pub use header::{round_align, HEADER_SIZE, POINTER_ALIGN};
