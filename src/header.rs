//! The header in front of every managed block
//!
//! A managed block is laid out as
//!
//! ```text
//! base                     base + HEADER_SIZE
//! |                        |
//! [ allocator identity ... ][ payload ............ ]
//! ```
//!
//! The identity is a type-erased pointer back to the `AsyncAllocator` that produced the block.
//! It is written once when the block is created and read once when it is released.  All of the
//! pointer arithmetic for the layout lives in this module.

use core::mem;
use core::ptr::NonNull;

use crate::allocator::AsyncAllocator;

/// The platform's pointer alignment, in bytes.  Headers are padded to it, and payloads are
/// aligned to it as long as the allocator honours its contract.
pub const POINTER_ALIGN: usize = mem::align_of::<usize>();

/// What gets stored in the header.
type AllocatorIdentity = NonNull<dyn AsyncAllocator>;

/// The size, in bytes, of the header in front of every block.
///
/// It only depends on the platform, never on the size of the payload.
pub const HEADER_SIZE: usize = round_align(mem::size_of::<AllocatorIdentity>());

const _: () = assert!(mem::align_of::<AllocatorIdentity>() <= POINTER_ALIGN);
const _: () = assert!(POINTER_ALIGN.is_power_of_two());

/// Rounds `size` up to a multiple of `POINTER_ALIGN`.
///
/// `size` must be at most `usize::MAX - (POINTER_ALIGN - 1)`; use `checked_round_align` when
/// that isn't known.
pub const fn round_align(size: usize) -> usize {
    (size + (POINTER_ALIGN - 1)) & !(POINTER_ALIGN - 1)
}

/// Like `round_align`, but returns `None` instead of overflowing.
pub const fn checked_round_align(size: usize) -> Option<usize> {
    match size.checked_add(POINTER_ALIGN - 1) {
        Some(padded) => Some(padded & !(POINTER_ALIGN - 1)),
        None => None,
    }
}

/// A managed block, identified by its base address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaggedBlock {
    base: NonNull<u8>,
}

impl TaggedBlock {
    /// Writes `allocator` into the header at `base` and returns the block.
    ///
    /// # Safety
    ///
    /// `base` must be valid for writes of at least `HEADER_SIZE` bytes.
    pub unsafe fn encode(base: NonNull<u8>, allocator: &(dyn AsyncAllocator + 'static)) -> Self {
        let identity: AllocatorIdentity = NonNull::from(allocator);
        // SAFETY: the caller guarantees `HEADER_SIZE >= size_of::<AllocatorIdentity>()` writable
        // bytes at offset 0.  No alignment is assumed.
        base.as_ptr()
            .cast::<AllocatorIdentity>()
            .write_unaligned(identity);
        TaggedBlock { base }
    }

    /// Recovers the block from the payload pointer handed out for it.
    ///
    /// # Safety
    ///
    /// `payload` must be the payload pointer of a block created with `encode`, i.e. it must sit
    /// exactly `HEADER_SIZE` bytes past the start of a live block.
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        // SAFETY: per the caller, the header lies within the same block just before `payload`.
        let base = payload.as_ptr().sub(HEADER_SIZE);
        TaggedBlock {
            base: NonNull::new_unchecked(base),
        }
    }

    /// The address the allocator returned for this block.
    pub fn base(self) -> NonNull<u8> {
        self.base
    }

    /// The first byte after the header.
    pub fn payload(self) -> NonNull<u8> {
        // SAFETY: `base` is non-null and the block never wraps the address space.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().wrapping_add(HEADER_SIZE)) }
    }

    /// Reads the identity of the allocator that owns this block.
    ///
    /// # Safety
    ///
    /// The block must still be live, i.e. not yet handed back to its allocator.
    pub unsafe fn allocator(self) -> NonNull<dyn AsyncAllocator> {
        // SAFETY: the header was written by `encode` and the block is still live.
        self.base
            .as_ptr()
            .cast::<AllocatorIdentity>()
            .read_unaligned()
    }
}
