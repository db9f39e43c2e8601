//! Virtual-memory page allocator for windows targets.

use core::ffi::c_void;
use core::ptr::{self, NonNull};

use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

use super::PageAllocator;

/// Allocation granularity of `VirtualAlloc` region starts.
const ALLOCATION_GRANULARITY: usize = 64 * 1024;

/// Page allocator backed by `VirtualAlloc`/`VirtualFree`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualPageAllocator;

impl VirtualPageAllocator {
    #[inline]
    pub const fn new() -> Self {
        VirtualPageAllocator
    }
}

impl PageAllocator for VirtualPageAllocator {
    fn allocate(&self, size: usize, align: usize, _user: *mut c_void) -> Option<NonNull<u8>> {
        if size == 0 || align > ALLOCATION_GRANULARITY {
            return None;
        }
        // SAFETY: reserving and committing a fresh region; the system
        // picks the base address.
        let ptr = unsafe {
            VirtualAlloc(
                ptr::null_mut(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _align: usize, _user: *mut c_void) {
        // SAFETY: `ptr` is the base of a region reserved by `allocate`;
        // MEM_RELEASE requires size zero.
        let ok = unsafe { VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE) };
        debug_assert_ne!(ok, 0, "VirtualFree of a pool region failed");
    }
}
