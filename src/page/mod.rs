//! The page-allocator capability: the pool's only source of raw storage.
//!
//! A [`Pool`](crate::Pool) obtains memory exclusively through this trait
//! and hands every region back with the exact `(ptr, size)` pair it was
//! given. The opaque `user` cookie supplied at pool construction is
//! forwarded on every call and owned by the caller.

use core::ffi::c_void;
use core::ptr::NonNull;

use once_cell::sync::Lazy;

mod system;
pub use system::SystemPageAllocator;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod mmap;
        pub use mmap::MmapPageAllocator;
    } else if #[cfg(windows)] {
        mod windows;
        pub use windows::VirtualPageAllocator;
    }
}

/// Bulk memory source consumed by the pool.
pub trait PageAllocator {
    /// Returns at least `size` bytes aligned to `align`, or `None` on
    /// failure. `align` is always a power of two.
    fn allocate(&self, size: usize, align: usize, user: *mut c_void) -> Option<NonNull<u8>>;

    /// Releases a region previously returned by [`PageAllocator::allocate`].
    ///
    /// # Safety
    /// `(ptr, size, align)` must be exactly the triple of a prior
    /// successful `allocate` call on this allocator, not yet deallocated.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, user: *mut c_void);
}

impl<A: PageAllocator + ?Sized> PageAllocator for &A {
    #[inline]
    fn allocate(&self, size: usize, align: usize, user: *mut c_void) -> Option<NonNull<u8>> {
        (**self).allocate(size, align, user)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, user: *mut c_void) {
        unsafe { (**self).deallocate(ptr, size, align, user) }
    }
}

/// Process-wide default page allocator, created lazily on first request.
///
/// Convenience for [`Pool::new`](crate::Pool::new); production callers are
/// encouraged to inject an allocator explicitly instead (for example
/// [`MmapPageAllocator`] on unix).
pub fn default_page_allocator() -> &'static SystemPageAllocator {
    static DEFAULT: Lazy<SystemPageAllocator> = Lazy::new(|| SystemPageAllocator::new());
    &DEFAULT
}
