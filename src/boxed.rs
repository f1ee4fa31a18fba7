//! An owning pointer into a managed block.
//!
//! It borrows the allocator it came from, so the allocator can't go away while the value is
//! alive, and dropping it hands the block back without the caller naming the allocator again.

use core::fmt;
use core::marker::PhantomData;
use core::ops;
use core::ptr::NonNull;

use crate::adapter;
use crate::allocator::AsyncAllocator;

/// A value (or slice) living in a block from an `AsyncAllocator`.
///
/// Made by `AsyncAllocatable::new_box` and `AsyncAllocatable::new_slice_box`.
pub struct AsyncBox<'a, T: ?Sized> {
    ptr: NonNull<T>,
    _owner: PhantomData<&'a dyn AsyncAllocator>,
    _value: PhantomData<T>,
}

impl<'a, T: ?Sized> ops::Deref for AsyncBox<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<'a, T: ?Sized> ops::DerefMut for AsyncBox<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<'a, T: ?Sized> Drop for AsyncBox<'a, T> {
    fn drop(&mut self) {
        // SAFETY: the box owns a live value built by `construct`/`construct_array`, and the
        // borrowed allocator is still alive.
        unsafe { adapter::drop_and_release(self.ptr) }
    }
}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for AsyncBox<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<'a, T: ?Sized> AsyncBox<'a, T> {
    /// Creates an `AsyncBox` from a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `AsyncAllocatable::construct` or `construct_array`, nothing else may
    /// own it, and its allocator must outlive `'a`.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        AsyncBox {
            ptr,
            _owner: PhantomData,
            _value: PhantomData,
        }
    }

    /// Gives up ownership without dropping the value or releasing the block.
    ///
    /// Pass the pointer to `AsyncAllocatable::destroy` (or `destroy_array`) to clean up.
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.ptr;
        core::mem::forget(self);
        ptr
    }

    /// Returns a pointer to the value in the box.
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }
}

#[cfg(test)]
mod tests {
    use crate::adapter::AsyncAllocatable;
    use crate::diagnostics::NullSink;
    use crate::test_allocator::{CountingAllocator, MallocAllocator};
    use std::rc::Rc;

    #[test]
    fn drop_releases_to_the_owner() {
        let adapter = AsyncAllocatable::new(NullSink);
        let allocator = CountingAllocator::new(MallocAllocator);
        let tracker = Rc::new(());

        {
            let mut boxed = adapter.new_box(&allocator, (Rc::clone(&tracker), 5u8)).unwrap();
            boxed.1 += 1;
            assert_eq!(boxed.1, 6);
            assert_eq!(Rc::strong_count(&tracker), 2);
            assert_eq!(allocator.outstanding(), 1);
        }

        assert_eq!(Rc::strong_count(&tracker), 1);
        assert_eq!(allocator.outstanding(), 0);
        assert_eq!(allocator.last_dealloc(), allocator.last_alloc());
    }

    #[test]
    fn slice_box_drops_every_element() {
        let adapter = AsyncAllocatable::new(NullSink);
        let allocator = CountingAllocator::new(MallocAllocator);
        let tracker = Rc::new(());

        let boxed = adapter
            .new_slice_box(&allocator, 4, |_| Rc::clone(&tracker))
            .unwrap();
        assert_eq!(boxed.len(), 4);
        assert_eq!(Rc::strong_count(&tracker), 5);

        drop(boxed);
        assert_eq!(Rc::strong_count(&tracker), 1);
        assert_eq!(allocator.allocs(), 1);
        assert_eq!(allocator.deallocs(), 1);
    }

    #[test]
    fn into_raw_then_destroy() {
        let adapter = AsyncAllocatable::new(NullSink);
        let allocator = CountingAllocator::new(MallocAllocator);

        let boxed = adapter.new_box(&allocator, 0xDEAD_BEEFu32).unwrap();
        assert_eq!(format!("{:?}", boxed), "3735928559");
        let raw = boxed.into_raw();
        assert_eq!(allocator.deallocs(), 0);

        unsafe { adapter.destroy(raw) };
        assert_eq!(allocator.deallocs(), 1);
    }
}
