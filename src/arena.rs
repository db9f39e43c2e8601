//! Arena: one contiguous page-allocator region and its block lists.
//!
//! The arena's metadata lives at the head of the region it describes, so
//! an arena never moves once created and raw back-pointers from block
//! headers stay valid for its whole life. The first usable byte sits at
//! `region + Arena::HEADER`.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::block::{BlockHeader, BlockList};
use crate::classes::{REGION_ALIGN, SMALL_MAX, TableId};

/// Region metadata stored at the head of every arena.
#[repr(C)]
pub(crate) struct Arena {
    /// Table this arena belongs to (index handle, see [`TableId`]).
    pub table: TableId,
    /// Fixed user-visible block size for small arenas; zero for medium.
    pub class_size: usize,
    /// Total bytes the region spans, this header included.
    pub region_size: usize,
    /// Bytes currently handed out, block headers included. Always equals
    /// the sum of `size` over the `used` list.
    pub used_bytes: usize,
    /// Blocks currently handed out.
    pub used: BlockList,
    /// Blocks available for reuse. Address-sorted for medium arenas.
    pub free: BlockList,
}

// Fixed-class strides and the first usable byte both stay header-aligned
// only while the arena header is a multiple of the region alignment.
const _: () = assert!(size_of::<Arena>() % REGION_ALIGN == 0);

impl Arena {
    pub const HEADER: usize = size_of::<Arena>();

    /// Places a small arena over `region` and carves it into uniform
    /// blocks of `class_size + BlockHeader::SIZE`, all pushed onto the
    /// free list in address order.
    ///
    /// # Safety
    /// `region` must be valid for `region_size` bytes, aligned to
    /// [`REGION_ALIGN`], and exclusively owned by the new arena.
    pub unsafe fn init_small(
        region: NonNull<u8>,
        region_size: usize,
        table: TableId,
        class_size: usize,
    ) -> NonNull<Arena> {
        let arena = unsafe { Self::init_common(region, region_size, table, class_size) };
        let stride = class_size + BlockHeader::SIZE;
        let mut offset = Self::HEADER;
        unsafe {
            while offset + stride <= region_size {
                let block = BlockHeader::init_at(region.as_ptr().add(offset), arena, stride);
                (*arena).free.push_back(block);
                offset += stride;
            }
            debug_assert!(!(*arena).free.is_empty(), "region too small for one block");
            NonNull::new_unchecked(arena)
        }
    }

    /// Places a medium arena over `region`; the whole usable space starts
    /// life as a single free block.
    ///
    /// # Safety
    /// Same contract as [`Arena::init_small`].
    pub unsafe fn init_medium(region: NonNull<u8>, region_size: usize) -> NonNull<Arena> {
        unsafe {
            let arena = Self::init_common(region, region_size, TableId::MEDIUM, 0);
            let block = BlockHeader::init_at(
                region.as_ptr().add(Self::HEADER),
                arena,
                region_size - Self::HEADER,
            );
            (*arena).free.push_back(block);
            NonNull::new_unchecked(arena)
        }
    }

    unsafe fn init_common(
        region: NonNull<u8>,
        region_size: usize,
        table: TableId,
        class_size: usize,
    ) -> *mut Arena {
        debug_assert!(region.as_ptr() as usize % REGION_ALIGN == 0);
        debug_assert!(region_size > Self::HEADER + BlockHeader::SIZE);
        let arena = region.cast::<Arena>().as_ptr();
        unsafe {
            arena.write(Arena {
                table,
                class_size,
                region_size,
                used_bytes: 0,
                used: BlockList::new_unlinked(),
                free: BlockList::new_unlinked(),
            });
            (*arena).used.init();
            (*arena).free.init();
        }
        arena
    }

    /// Whether no block of this arena is currently handed out.
    pub fn is_unused(&self) -> bool {
        self.used.is_empty()
    }

    /// Pops one fixed-size block off the free list, or `None` when the
    /// arena is exhausted.
    ///
    /// # Safety
    /// `arena` must point to a live small arena.
    pub unsafe fn take_fixed_block(arena: *mut Arena) -> Option<*mut BlockHeader> {
        unsafe {
            let block = (*arena).free.pop_front()?;
            (*arena).used.push_back(block);
            (*arena).used_bytes += (*block).size;
            debug_assert!((*arena).used_bytes <= (*arena).region_size);
            Some(block)
        }
    }

    /// First fit over the address-sorted free list for a block of `needed`
    /// total bytes (header included), splitting off the tail when the
    /// remainder is still large enough to serve another medium request.
    ///
    /// `needed` must be a multiple of [`REGION_ALIGN`] so every split-off
    /// header lands on an aligned boundary.
    ///
    /// # Safety
    /// `arena` must point to a live medium arena.
    pub unsafe fn take_variable_block(arena: *mut Arena, needed: usize) -> Option<*mut BlockHeader> {
        debug_assert!(needed % REGION_ALIGN == 0);
        unsafe {
            for block in (*arena).free.iter() {
                if (*block).size < needed {
                    continue;
                }
                let remainder = (*block).size - needed;
                // A smaller tail would be a fragment the small regime can
                // never serve from, so keep it attached instead.
                if remainder > SMALL_MAX + BlockHeader::SIZE {
                    (*block).size = needed;
                    let tail =
                        BlockHeader::init_at(block.cast::<u8>().add(needed), arena, remainder);
                    (*arena).free.ordered_insert(tail);
                }
                BlockList::unlink(block);
                (*arena).used.push_back(block);
                (*arena).used_bytes += (*block).size;
                debug_assert!((*arena).used_bytes <= (*arena).region_size);
                return Some(block);
            }
            None
        }
    }

    /// Returns a fixed-size block to the free list. Order is irrelevant;
    /// small blocks never coalesce.
    ///
    /// # Safety
    /// `block` must be a used member of this small arena.
    pub unsafe fn release_fixed_block(arena: *mut Arena, block: *mut BlockHeader) {
        unsafe {
            debug_assert_eq!((*block).size, (*arena).class_size + BlockHeader::SIZE);
            BlockList::unlink(block);
            (*arena).used_bytes -= (*block).size;
            (*arena).free.push_back(block);
        }
    }

    /// Returns a variable block to the free list at its address-sorted
    /// position, then merges adjacent neighbours.
    ///
    /// # Safety
    /// `block` must be a used member of this medium arena.
    pub unsafe fn release_variable_block(arena: *mut Arena, block: *mut BlockHeader) {
        unsafe {
            BlockList::unlink(block);
            (*arena).used_bytes -= (*block).size;
            (*arena).free.ordered_insert(block);
            (*arena).free.coalesce();
            debug_assert_eq!(
                (*arena).used_bytes,
                (*arena).used.iter().map(|b| (*b).size).sum::<usize>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{Layout, alloc, dealloc};

    struct Region {
        ptr: NonNull<u8>,
        layout: Layout,
    }

    impl Region {
        fn new(size: usize) -> Self {
            let layout = Layout::from_size_align(size, REGION_ALIGN).unwrap();
            let ptr = NonNull::new(unsafe { alloc(layout) }).expect("test region");
            Self { ptr, layout }
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }

    #[test]
    fn small_arena_carves_uniform_blocks() {
        let region = Region::new(4096);
        unsafe {
            let arena = Arena::init_small(region.ptr, 4096, TableId::small(3), 64).as_ptr();
            let expected = (4096 - Arena::HEADER) / (64 + BlockHeader::SIZE);
            assert_eq!((*arena).free.count(), expected);
            assert!((*arena).is_unused());

            let block = Arena::take_fixed_block(arena).unwrap();
            assert_eq!((*block).size, 64 + BlockHeader::SIZE);
            assert_eq!((*arena).used_bytes, 64 + BlockHeader::SIZE);
            assert!(!(*arena).is_unused());

            Arena::release_fixed_block(arena, block);
            assert_eq!((*arena).used_bytes, 0);
            assert!((*arena).is_unused());
        }
    }

    #[test]
    fn small_arena_exhausts_then_refills() {
        let region = Region::new(4096);
        unsafe {
            let arena = Arena::init_small(region.ptr, 4096, TableId::small(0), 16).as_ptr();
            let mut taken = Vec::new();
            while let Some(block) = Arena::take_fixed_block(arena) {
                taken.push(block);
            }
            assert!((*arena).free.is_empty());
            assert_eq!((*arena).used.count(), taken.len());
            for block in taken {
                Arena::release_fixed_block(arena, block);
            }
            assert!((*arena).is_unused());
        }
    }

    #[test]
    fn medium_arena_splits_and_recombines() {
        const REGION: usize = 128 * 1024;
        let region = Region::new(REGION);
        unsafe {
            let arena = Arena::init_medium(region.ptr, REGION).as_ptr();
            let whole = REGION - Arena::HEADER;
            assert_eq!((*arena).free.count(), 1);

            let needed = 1008 + BlockHeader::SIZE;
            let block = Arena::take_variable_block(arena, needed).unwrap();
            // remainder is far above the split threshold
            assert_eq!((*block).size, needed);
            assert_eq!((*arena).free.count(), 1);
            let tail = (*arena).free.iter().next().unwrap();
            assert_eq!((*tail).size, whole - needed);
            assert_eq!(BlockHeader::end_addr(block), tail as usize);

            Arena::release_variable_block(arena, block);
            assert_eq!((*arena).free.count(), 1);
            let merged = (*arena).free.iter().next().unwrap();
            assert_eq!((*merged).size, whole);
            assert_eq!((*arena).used_bytes, 0);
        }
    }

    #[test]
    fn medium_arena_keeps_small_tails_attached() {
        const REGION: usize = 128 * 1024;
        let region = Region::new(REGION);
        unsafe {
            let arena = Arena::init_medium(region.ptr, REGION).as_ptr();
            let whole = REGION - Arena::HEADER;
            // leave a remainder just below the split threshold
            let needed = whole - SMALL_MAX;
            let block = Arena::take_variable_block(arena, needed).unwrap();
            assert_eq!((*block).size, whole, "small tail must stay attached");
            assert!((*arena).free.is_empty());
            Arena::release_variable_block(arena, block);
            assert_eq!((*arena).free.count(), 1);
        }
    }

    #[test]
    fn medium_arena_rejects_oversized_request() {
        let region = Region::new(4096);
        unsafe {
            let arena = Arena::init_medium(region.ptr, 4096).as_ptr();
            assert!(Arena::take_variable_block(arena, 8192).is_none());
            assert!((*arena).is_unused());
        }
    }
}
