//! Where the adapter gets its blocks
//!
//! ```rust
//! use core::ptr::NonNull;
//! use async_safe_alloc::{AllocError, AsyncAllocator};
//!
//! struct MyPageAllocator;
//!
//! unsafe impl AsyncAllocator for MyPageAllocator {
//!     fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
//!         // Carve `size` bytes out of pre-mapped pages, without locks...
//!         Err(AllocError::OutOfMemory { requested: size })
//!     }
//!     unsafe fn dealloc(&self, _buffer: NonNull<u8>) {}
//! }
//! ```

use core::ptr::NonNull;

use crate::error::AllocError;

/// The `AsyncAllocator` trait is used to allow for different providers of memory that are safe to
/// use while interrupting arbitrary code, e.g. from inside a signal handler.
///
/// Which provider to use is decided at every allocation site; the adapter remembers the choice in
/// the block header so release sites don't have to.
///
/// # Safety
///
/// Implementors promise that:
///  * `alloc` and `dealloc` never block, never take a lock the interrupted code might be holding,
///    and never reenter the process's ordinary allocator
///  * every buffer returned by `alloc` is aligned to at least
///    [`POINTER_ALIGN`](crate::header::POINTER_ALIGN) and is valid for `size` bytes until it is
///    passed back to `dealloc`
///  * `alloc` reports failure through its return value and never panics
pub unsafe trait AsyncAllocator {
    /// Tries to reserve `size` contiguous bytes.
    ///
    /// If it returns `Ok(buffer)`, ownership of the memory at `buffer` is transferred to the
    /// caller until it is handed back through `dealloc`.
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Releases a buffer.
    ///
    /// # Safety
    ///
    /// `buffer` must have been returned by `alloc` on this same instance and not released since.
    unsafe fn dealloc(&self, buffer: NonNull<u8>);
}

/// An allocator that is never successful in returning memory.
///
/// Useful as a stand-in when a feature should run in its reduced-functionality mode, and for
/// exercising the failure path.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct NoMemory;

unsafe impl AsyncAllocator for NoMemory {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_log!("NoMemory: refusing %zu bytes\n\0", size);
        Err(AllocError::OutOfMemory { requested: size })
    }

    unsafe fn dealloc(&self, _buffer: NonNull<u8>) {
        unreachable!("NoMemory never hands out buffers, so none can come back")
    }
}
