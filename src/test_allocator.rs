//! Simple allocators for testing

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::allocator::AsyncAllocator;
use crate::error::AllocError;

/// A test allocator that gets memory using `libc::malloc`
///
/// `malloc` is *not* reentrancy-safe, so this must never be used from a signal handler.  It is
/// here so tests have a real source of memory.
#[derive(Clone, Copy, Default, Debug)]
pub struct MallocAllocator;

unsafe impl AsyncAllocator for MallocAllocator {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        debug_log!("MallocAllocator: getting %zu bytes from libc::malloc\n\0", size);
        // malloc(0) may legally return null, so always ask for at least a byte.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        NonNull::new(ptr.cast::<u8>()).ok_or(AllocError::OutOfMemory { requested: size })
    }

    unsafe fn dealloc(&self, buffer: NonNull<u8>) {
        debug_log!("MallocAllocator: freeing %p\n\0", buffer.as_ptr());
        libc::free(buffer.as_ptr().cast());
    }
}

/// Wraps another allocator and keeps count of what goes through it.
///
/// All bookkeeping uses atomics, so a `CountingAllocator` can live in a `static`.
#[derive(Debug)]
pub struct CountingAllocator<A> {
    inner: A,
    allocs: AtomicUsize,
    failures: AtomicUsize,
    deallocs: AtomicUsize,
    last_request: AtomicUsize,
    last_alloc: AtomicUsize,
    last_dealloc: AtomicUsize,
    failing: AtomicBool,
}

impl<A> CountingAllocator<A> {
    /// Wraps `inner`, with all counters at zero.
    pub const fn new(inner: A) -> Self {
        CountingAllocator {
            inner,
            allocs: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            deallocs: AtomicUsize::new(0),
            last_request: AtomicUsize::new(0),
            last_alloc: AtomicUsize::new(0),
            last_dealloc: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// While `failing` is set, every `alloc` is refused without asking the inner allocator.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `alloc` calls, refused ones included.
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    /// Number of `alloc` calls that returned an error.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of `dealloc` calls.
    pub fn deallocs(&self) -> usize {
        self.deallocs.load(Ordering::SeqCst)
    }

    /// Blocks handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.allocs() - self.failures() - self.deallocs()
    }

    /// The size passed to the most recent `alloc`.
    pub fn last_request(&self) -> usize {
        self.last_request.load(Ordering::SeqCst)
    }

    /// The address returned by the most recent successful `alloc`, or 0.
    pub fn last_alloc(&self) -> usize {
        self.last_alloc.load(Ordering::SeqCst)
    }

    /// The address passed to the most recent `dealloc`, or 0.
    pub fn last_dealloc(&self) -> usize {
        self.last_dealloc.load(Ordering::SeqCst)
    }
}

unsafe impl<A: AsyncAllocator> AsyncAllocator for CountingAllocator<A> {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        self.last_request.store(size, Ordering::SeqCst);

        let result = if self.failing.load(Ordering::SeqCst) {
            Err(AllocError::OutOfMemory { requested: size })
        } else {
            self.inner.alloc(size)
        };
        match result {
            Ok(buffer) => self.last_alloc.store(buffer.as_ptr() as usize, Ordering::SeqCst),
            Err(_) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }

    unsafe fn dealloc(&self, buffer: NonNull<u8>) {
        self.deallocs.fetch_add(1, Ordering::SeqCst);
        self.last_dealloc.store(buffer.as_ptr() as usize, Ordering::SeqCst);
        self.inner.dealloc(buffer);
    }
}
