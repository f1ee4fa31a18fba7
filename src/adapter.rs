//! The `AsyncAllocatable` type
//!
//! It asks an explicitly chosen `AsyncAllocator` for a block, tags the block with the allocator's
//! identity, and later hands the block back to that same allocator given nothing but the payload
//! pointer.  On top of the raw byte interface sits a two-phase object lifecycle: `construct`
//! allocates and moves a value in, `destroy` drops it in place and releases the block.

use core::mem;
use core::ptr::{self, NonNull};

use crate::allocator::AsyncAllocator;
use crate::boxed::AsyncBox;
use crate::diagnostics::{DiagnosticSink, NullSink};
use crate::error::AllocError;
use crate::header::{TaggedBlock, HEADER_SIZE, POINTER_ALIGN};

/// Allocates header-tagged blocks from pluggable allocators.
///
/// The only thing it holds is the sink that allocation failures are reported to; it has no other
/// state and takes no locks, so whether concurrent use is sound is entirely up to the allocators.
///
/// Allocator arguments are `&(dyn AsyncAllocator + 'static)`: any `&A` coerces to that as long as
/// `A` itself doesn't borrow anything.
#[derive(Clone, Copy, Default, Debug)]
pub struct AsyncAllocatable<S = NullSink> {
    sink: S,
}

impl<S: DiagnosticSink> AsyncAllocatable<S> {
    /// Creates an adapter that reports failures to `sink`.
    pub const fn new(sink: S) -> Self {
        AsyncAllocatable { sink }
    }

    /// The sink failures are reported to.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Allocates `size` payload bytes from `allocator`.
    ///
    /// The allocator is asked for `size + HEADER_SIZE` bytes.  On success the returned pointer is
    /// `HEADER_SIZE` bytes past the start of the block and is pointer-aligned.  On failure the
    /// error is reported to the sink once and nothing is written.
    pub fn allocate(
        &self,
        size: usize,
        allocator: &(dyn AsyncAllocator + 'static),
    ) -> Result<NonNull<u8>, AllocError> {
        self.perform_allocate(size, allocator)
    }

    /// Allocates storage for an array, `size` being the byte size of the whole array.
    ///
    /// The block gets one header, not one per element.
    pub fn allocate_array(
        &self,
        size: usize,
        allocator: &(dyn AsyncAllocator + 'static),
    ) -> Result<NonNull<u8>, AllocError> {
        self.perform_allocate(size, allocator)
    }

    /// Hands the block behind `payload` back to the allocator that produced it.
    ///
    /// `size` is informational: it is not used to find the allocator and is not checked against
    /// the allocation.  Passing the same size that was allocated is still the caller's job, since
    /// allocators with size classes may depend on it in the future.
    ///
    /// # Safety
    ///
    /// `payload` must come from `allocate` or `allocate_array` (on any adapter), must not have been
    /// released already, and its allocator must still be alive.
    pub unsafe fn deallocate(&self, payload: NonNull<u8>, size: usize) {
        release(payload, size)
    }

    /// Array counterpart of `deallocate`; calls the allocator's `dealloc` once for the whole block.
    ///
    /// # Safety
    ///
    /// Same as `deallocate`.
    pub unsafe fn deallocate_array(&self, payload: NonNull<u8>, size: usize) {
        release(payload, size)
    }

    /// Allocates room for a `T` from `allocator` and moves `value` into it.
    ///
    /// Types aligned more strictly than `POINTER_ALIGN` are refused with
    /// `AllocError::UnsupportedAlignment`.  If allocation fails, `value` is dropped here.
    pub fn construct<T>(
        &self,
        allocator: &(dyn AsyncAllocator + 'static),
        value: T,
    ) -> Result<NonNull<T>, AllocError> {
        self.check_align::<T>()?;
        let ptr = self.allocate(mem::size_of::<T>(), allocator)?.cast::<T>();
        // SAFETY: the payload is fresh, pointer-aligned, and `size_of::<T>()` bytes long.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Allocates one block for `len` values of `T` and fills it with `init(0)`, `init(1)`, ...
    ///
    /// If `init` panics, the elements built so far are dropped and the block is released.
    pub fn construct_array<T, F>(
        &self,
        allocator: &(dyn AsyncAllocator + 'static),
        len: usize,
        mut init: F,
    ) -> Result<NonNull<[T]>, AllocError>
    where
        F: FnMut(usize) -> T,
    {
        self.check_align::<T>()?;
        let size = match mem::size_of::<T>().checked_mul(len) {
            Some(size) => size,
            None => {
                return Err(self.fail(AllocError::SizeOverflow {
                    requested: usize::MAX,
                }))
            }
        };
        let first = self.allocate_array(size, allocator)?.cast::<T>();

        let mut guard = PartialArray {
            first,
            initialized: 0,
            size,
        };
        for index in 0..len {
            let value = init(index);
            // SAFETY: `index < len`, so the slot lies within the `size`-byte payload.
            unsafe { first.as_ptr().add(index).write(value) };
            guard.initialized += 1;
        }
        mem::forget(guard);

        Ok(NonNull::slice_from_raw_parts(first, len))
    }

    /// Drops the value at `ptr` in place and releases its block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `construct`, must not have been destroyed already, and its allocator
    /// must still be alive.
    pub unsafe fn destroy<T>(&self, ptr: NonNull<T>) {
        drop_and_release(ptr)
    }

    /// Drops every element of the array at `ptr` in place and releases its block once.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `construct_array`, must not have been destroyed already, and its
    /// allocator must still be alive.
    pub unsafe fn destroy_array<T>(&self, ptr: NonNull<[T]>) {
        drop_and_release(ptr)
    }

    /// Like `construct`, but returns an owning `AsyncBox` that borrows `allocator`.
    pub fn new_box<'a, T>(
        &self,
        allocator: &'a (dyn AsyncAllocator + 'static),
        value: T,
    ) -> Result<AsyncBox<'a, T>, AllocError> {
        let ptr = self.construct(allocator, value)?;
        // SAFETY: `ptr` was just constructed, and the box can't outlive `allocator`.
        Ok(unsafe { AsyncBox::from_raw(ptr) })
    }

    /// Like `construct_array`, but returns an owning `AsyncBox<[T]>`.
    pub fn new_slice_box<'a, T, F>(
        &self,
        allocator: &'a (dyn AsyncAllocator + 'static),
        len: usize,
        init: F,
    ) -> Result<AsyncBox<'a, [T]>, AllocError>
    where
        F: FnMut(usize) -> T,
    {
        let ptr = self.construct_array(allocator, len, init)?;
        // SAFETY: as in `new_box`.
        Ok(unsafe { AsyncBox::from_raw(ptr) })
    }

    fn perform_allocate(
        &self,
        size: usize,
        allocator: &(dyn AsyncAllocator + 'static),
    ) -> Result<NonNull<u8>, AllocError> {
        debug_log!("AsyncAllocatable: allocating %zu bytes\n\0", size);
        let total = match size.checked_add(HEADER_SIZE) {
            Some(total) => total,
            None => return Err(self.fail(AllocError::SizeOverflow { requested: size })),
        };

        // Try to allocate space for the payload *and* the allocator back-reference
        let base = allocator.alloc(total).map_err(|err| self.fail(err))?;
        debug_assert_eq!(
            base.as_ptr() as usize % POINTER_ALIGN,
            0,
            "allocator returned a buffer that isn't pointer-aligned"
        );

        // SAFETY: the allocator just gave us `total >= HEADER_SIZE` bytes at `base`.
        let block = unsafe { TaggedBlock::encode(base, allocator) };
        debug_log!("AsyncAllocatable: block at %p, payload at %p\n\0", base.as_ptr(), block.payload().as_ptr());
        Ok(block.payload())
    }

    fn check_align<T>(&self) -> Result<(), AllocError> {
        let align = mem::align_of::<T>();
        if align > POINTER_ALIGN {
            Err(self.fail(AllocError::UnsupportedAlignment { align }))
        } else {
            Ok(())
        }
    }

    fn fail(&self, err: AllocError) -> AllocError {
        self.sink
            .report(format_args!("async-safe allocation failed: {}", err));
        err
    }
}

/// Finds the owning allocator from the header and gives it the block back.
///
/// # Safety
///
/// See `AsyncAllocatable::deallocate`.
pub(crate) unsafe fn release(payload: NonNull<u8>, size: usize) {
    // Only ever informational
    let _ = size;
    debug_log!("AsyncAllocatable: deallocating %zu bytes at %p\n\0", size, payload.as_ptr());

    let block = TaggedBlock::from_payload(payload);
    let allocator = block.allocator();
    allocator.as_ref().dealloc(block.base());
}

/// Drops the value (or slice) at `ptr` and releases the block holding it.
///
/// # Safety
///
/// `ptr` must point to a live value built by `construct` or `construct_array`.
pub(crate) unsafe fn drop_and_release<T: ?Sized>(ptr: NonNull<T>) {
    let size = mem::size_of_val(ptr.as_ref());
    ptr::drop_in_place(ptr.as_ptr());
    release(ptr.cast(), size);
}

/// Cleans up a half-built array if an element initializer panics.
struct PartialArray<T> {
    first: NonNull<T>,
    initialized: usize,
    size: usize,
}

impl<T> Drop for PartialArray<T> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.first.as_ptr(),
                self.initialized,
            ));
            release(self.first.cast(), self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::NoMemory;
    use crate::test_allocator::{CountingAllocator, MallocAllocator};
    use core::cell::{Cell, RefCell};
    use core::fmt;

    #[derive(Default)]
    struct RecordingSink {
        reports: Cell<usize>,
        last: RefCell<String>,
    }

    impl DiagnosticSink for RecordingSink {
        fn report(&self, message: fmt::Arguments<'_>) {
            self.reports.set(self.reports.get() + 1);
            *self.last.borrow_mut() = message.to_string();
        }
    }

    #[test]
    fn payload_sits_after_the_header() {
        let adapter = AsyncAllocatable::new(NullSink);
        let allocator = CountingAllocator::new(MallocAllocator);

        let payload = adapter.allocate(16, &allocator).unwrap();
        assert_eq!(allocator.last_request(), 16 + HEADER_SIZE);
        assert_eq!(payload.as_ptr() as usize, allocator.last_alloc() + HEADER_SIZE);
        assert_eq!(payload.as_ptr() as usize % POINTER_ALIGN, 0);

        unsafe { adapter.deallocate(payload, 16) };
        assert_eq!(allocator.last_dealloc(), allocator.last_alloc());
        assert_eq!(allocator.outstanding(), 0);
    }

    #[test]
    fn failure_is_reported_once() {
        let adapter = AsyncAllocatable::new(RecordingSink::default());
        let err = adapter.allocate(16, &NoMemory).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfMemory {
                requested: 16 + HEADER_SIZE
            }
        );
        assert_eq!(adapter.sink().reports.get(), 1);
        assert!(adapter.sink().last.borrow().contains("out of memory"));
    }

    #[test]
    fn overflowing_size_never_reaches_the_allocator() {
        let adapter = AsyncAllocatable::new(RecordingSink::default());
        let allocator = CountingAllocator::new(MallocAllocator);

        let err = adapter.allocate(usize::MAX, &allocator).unwrap_err();
        assert_eq!(err, AllocError::SizeOverflow { requested: usize::MAX });
        assert_eq!(allocator.allocs(), 0);
        assert_eq!(adapter.sink().reports.get(), 1);

        let err = adapter
            .construct_array(&allocator, usize::MAX, |i| i as u64)
            .unwrap_err();
        assert!(matches!(err, AllocError::SizeOverflow { .. }));
        assert_eq!(allocator.allocs(), 0);
        assert_eq!(adapter.sink().reports.get(), 2);
    }

    #[test]
    fn overaligned_types_are_refused() {
        #[repr(align(64))]
        struct CacheLine([u8; 64]);

        let adapter = AsyncAllocatable::new(RecordingSink::default());
        let allocator = CountingAllocator::new(MallocAllocator);
        let err = adapter.construct(&allocator, CacheLine([0; 64])).unwrap_err();
        assert_eq!(err, AllocError::UnsupportedAlignment { align: 64 });
        assert_eq!(allocator.allocs(), 0);
        assert_eq!(adapter.sink().reports.get(), 1);
    }

    #[test]
    fn construct_and_destroy() {
        let adapter = AsyncAllocatable::<NullSink>::default();
        let allocator = CountingAllocator::new(MallocAllocator);

        let ptr = adapter.construct(&allocator, [7u32, 8, 9]).unwrap();
        assert_eq!(unsafe { *ptr.as_ref() }, [7, 8, 9]);
        assert_eq!(allocator.last_request(), 12 + HEADER_SIZE);

        unsafe { adapter.destroy(ptr) };
        assert_eq!(allocator.deallocs(), 1);
        assert_eq!(allocator.last_dealloc(), allocator.last_alloc());
    }

    #[test]
    fn construct_array_has_one_header() {
        let adapter = AsyncAllocatable::<NullSink>::default();
        let allocator = CountingAllocator::new(MallocAllocator);

        let ptr = adapter
            .construct_array(&allocator, 10, |i| (i * i) as u16)
            .unwrap();
        assert_eq!(ptr.len(), 10);
        assert_eq!(allocator.allocs(), 1);
        assert_eq!(allocator.last_request(), 20 + HEADER_SIZE);
        assert_eq!(unsafe { ptr.as_ref() }[9], 81);

        unsafe { adapter.destroy_array(ptr) };
        assert_eq!(allocator.deallocs(), 1);
    }

    #[test]
    fn panicking_initializer_cleans_up() {
        use std::panic::{catch_unwind, AssertUnwindSafe};
        use std::rc::Rc;

        let adapter = AsyncAllocatable::<NullSink>::default();
        let allocator = CountingAllocator::new(MallocAllocator);
        let tracker = Rc::new(());

        let result = catch_unwind(AssertUnwindSafe(|| {
            adapter.construct_array(&allocator, 5, |i| {
                if i == 3 {
                    panic!("element {} refused to initialize", i);
                }
                Rc::clone(&tracker)
            })
        }));
        assert!(result.is_err());
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert_eq!(allocator.allocs(), 1);
        assert_eq!(allocator.deallocs(), 1);
    }
}
