//! Anonymous-mapping page allocator for unix targets.

use core::ffi::c_void;
use core::ptr::{self, NonNull};

use super::PageAllocator;
use crate::utils::align_up;

/// Page allocator backed by `mmap`/`munmap`.
///
/// Regions bypass the process heap entirely and are returned to the
/// kernel on deallocation, which suits the pool's release-back-to-OS
/// policy on Linux and Android.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapPageAllocator;

impl MmapPageAllocator {
    #[inline]
    pub const fn new() -> Self {
        MmapPageAllocator
    }

    /// Hardware page size probe.
    pub fn system_page_size() -> usize {
        // SAFETY: sysconf with a valid name has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }
}

impl PageAllocator for MmapPageAllocator {
    fn allocate(&self, size: usize, align: usize, _user: *mut c_void) -> Option<NonNull<u8>> {
        let page = Self::system_page_size();
        if size == 0 || align > page {
            return None;
        }
        let len = align_up(size, page);
        // SAFETY: a fresh anonymous private mapping, no file involved.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, _align: usize, _user: *mut c_void) {
        let len = align_up(size, Self::system_page_size());
        // SAFETY: `ptr`/`len` describe exactly the mapping produced by
        // `allocate` above.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) };
        debug_assert_eq!(rc, 0, "munmap of a pool region failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_unmaps_a_region() {
        let alloc = MmapPageAllocator::new();
        let page = MmapPageAllocator::system_page_size();
        assert!(page.is_power_of_two());

        let ptr = alloc.allocate(3 * page + 1, 16, ptr::null_mut()).unwrap();
        assert_eq!(ptr.as_ptr() as usize % page, 0);
        unsafe {
            ptr.as_ptr().write_bytes(0xC3, 3 * page + 1);
            alloc.deallocate(ptr, 3 * page + 1, 16, ptr::null_mut());
        }
    }

    #[test]
    fn rejects_alignment_beyond_a_page() {
        let alloc = MmapPageAllocator::new();
        let page = MmapPageAllocator::system_page_size();
        assert!(alloc.allocate(page, page * 2, ptr::null_mut()).is_none());
    }
}
