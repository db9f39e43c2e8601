//! The public three-regime pool allocator.
//!
//! [`Pool`] routes each request by size and alignment: small requests go
//! to segregated fixed-block tables, medium ones to coalescing variable
//! arenas, and the rest straight to the page allocator. See the crate
//! docs for the regime boundaries.

use core::ffi::c_void;
use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};
use std::time::Instant;

use tracing::{debug, trace};

use crate::arena::Arena;
use crate::block::{BlockHeader, BlockList};
use crate::classes::{
    CLASS_SIZES, DEFAULT_ALIGN, MAX_ALIGN, MAX_LARGE_ALIGN, MIN_PAGE_SIZE, PAGES_PER_ARENA,
    REGION_ALIGN, SMALL_MAX, SizeClassTable, TableId, TableKind, build_small_lookup,
};
use crate::error::{PoolError, PoolResult};
use crate::page::{PageAllocator, SystemPageAllocator, default_page_allocator};
use crate::utils::align_up;

mod config;
mod stats;

pub use config::PoolConfig;
pub use stats::{PoolStats, RegimeStats};
use stats::RegimeKind;

/// A single-owner memory pool multiplexing three allocation strategies
/// over one [`PageAllocator`].
///
/// Every operation takes `&mut self`; share a pool across threads only
/// behind external serialisation. Two pools never share state. Dropping
/// the pool returns every region to the page allocator, whether or not
/// the caller freed all its pointers first.
pub struct Pool<A: PageAllocator = &'static SystemPageAllocator> {
    page_allocator: A,
    /// Opaque cookie forwarded to every page-allocator call.
    user: *mut c_void,
    /// Bulk-allocation unit; arenas span [`PAGES_PER_ARENA`] of these.
    page_size: usize,
    /// One fixed-block table per entry of [`CLASS_SIZES`].
    small_tables: Vec<SizeClassTable>,
    /// Direct map from `(aligned_size / 4) - 1` to small table index.
    small_lookup: Box<[u8]>,
    medium_table: SizeClassTable,
    /// Live large-regime headers. Boxed so the embedded sentinel keeps
    /// its address when the pool moves.
    large: Box<BlockList>,
    /// Scratch staging for arena release, reused across frees.
    pending: Vec<NonNull<Arena>>,
    config: PoolConfig,
    stats: PoolStats,
}

impl Pool<&'static SystemPageAllocator> {
    /// Creates a pool over the process-wide default page allocator.
    pub fn new(page_size: usize) -> PoolResult<Self> {
        Self::with_allocator(page_size, default_page_allocator(), ptr::null_mut())
    }
}

impl<A: PageAllocator> Pool<A> {
    /// Creates a pool over an explicit page allocator. `user` is an
    /// opaque cookie forwarded on every page-allocator call.
    ///
    /// `page_size` must be at least [`MIN_PAGE_SIZE`].
    pub fn with_allocator(page_size: usize, page_allocator: A, user: *mut c_void) -> PoolResult<Self> {
        Self::with_config(page_size, page_allocator, user, PoolConfig::default())
    }

    pub fn with_config(
        page_size: usize,
        page_allocator: A,
        user: *mut c_void,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(PoolError::InvalidPageSize(page_size));
        }
        let mut large = Box::new(BlockList::new_unlinked());
        // SAFETY: the boxed list keeps its heap address for its lifetime.
        unsafe { large.init() };
        Ok(Self {
            page_allocator,
            user,
            page_size,
            small_tables: CLASS_SIZES.iter().map(|&c| SizeClassTable::small(c)).collect(),
            small_lookup: build_small_lookup(),
            medium_table: SizeClassTable::variable(),
            large,
            pending: Vec::new(),
            config,
            stats: PoolStats::default(),
        })
    }

    /// Configured bulk-allocation unit.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Upper bound of the medium regime (inclusive), after alignment.
    pub fn medium_max(&self) -> usize {
        self.page_size * PAGES_PER_ARENA
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Allocates `size` bytes. `align = 0` means the default alignment
    /// of [`DEFAULT_ALIGN`]; other values must be powers of two up to
    /// [`MAX_LARGE_ALIGN`]. Any non-default alignment routes to the
    /// large regime, because the in-arena layouts bake in the default.
    ///
    /// On failure the pool is unchanged; no partial arena stays visible.
    pub fn allocate(&mut self, size: usize, align: usize) -> PoolResult<NonNull<u8>> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }
        let align = if align == 0 { DEFAULT_ALIGN } else { align };
        if !align.is_power_of_two() || align > MAX_LARGE_ALIGN {
            return Err(PoolError::UnsupportedAlignment(align));
        }
        let align = align.max(DEFAULT_ALIGN);
        let start = self.config.track_stats.then(Instant::now);

        let aligned = align_up(size, align);
        let result = if align == DEFAULT_ALIGN && aligned <= SMALL_MAX {
            self.allocate_small(aligned)
        } else if align == DEFAULT_ALIGN && aligned <= self.medium_max() {
            self.allocate_medium(aligned)
        } else {
            self.allocate_large(aligned, align)
        };

        if let (Ok(ptr), Some(pattern)) = (&result, self.config.alloc_pattern) {
            // poison only the bytes the caller asked for
            unsafe { ptr.as_ptr().write_bytes(pattern, size) };
        }
        if let Some(start) = start {
            self.stats.alloc_time += start.elapsed();
        }
        result
    }

    /// [`allocate`](Pool::allocate) with the default alignment.
    pub fn allocate_default(&mut self, size: usize) -> PoolResult<NonNull<u8>> {
        self.allocate(size, 0)
    }

    /// Allocates storage for one `T`. Zero-sized types are rejected.
    ///
    /// Region alignment and the in-band header sizes make every returned
    /// block [`MAX_ALIGN`]-aligned, so most `T` are served through the
    /// regular size regimes; over-aligned types take the large regime.
    pub fn allocate_one<T>(&mut self) -> PoolResult<NonNull<T>> {
        let ptr = if align_of::<T>() > MAX_ALIGN {
            self.allocate(size_of::<T>(), align_of::<T>())?
        } else {
            self.allocate_default(size_of::<T>())?
        };
        debug_assert!(ptr.as_ptr() as usize % align_of::<T>() == 0);
        Ok(ptr.cast())
    }

    /// Allocates contiguous storage for `count` values of `T`. The
    /// memory is uninitialised; free it through the pointer to the first
    /// element.
    pub fn allocate_array<T>(&mut self, count: usize) -> PoolResult<NonNull<[T]>> {
        let bytes = size_of::<T>()
            .checked_mul(count)
            .ok_or(PoolError::SizeOverflow)?;
        let ptr = if align_of::<T>() > MAX_ALIGN {
            self.allocate(bytes, align_of::<T>())?
        } else {
            self.allocate_default(bytes)?
        };
        debug_assert!(ptr.as_ptr() as usize % align_of::<T>() == 0);
        Ok(NonNull::slice_from_raw_parts(ptr.cast::<T>(), count))
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by this pool's `allocate` family and
    /// not freed since. Freeing foreign or stale pointers is undefined
    /// behaviour (large pointers are verified when statistics are on).
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let start = self.config.track_stats.then(Instant::now);
        unsafe {
            let block = BlockHeader::from_user_ptr(ptr);
            if let Some(pattern) = self.config.dealloc_pattern {
                ptr.as_ptr()
                    .write_bytes(pattern, (*block).size - BlockHeader::SIZE);
            }
            let arena = (*block).arena;
            // Large headers carry a null or small-integer alignment tag
            // in the arena slot; real arenas live at mappable addresses
            // far above MAX_LARGE_ALIGN.
            if arena as usize <= MAX_LARGE_ALIGN {
                self.free_large(block);
            } else {
                match (*arena).table.small_index() {
                    Some(class) => self.free_small(arena, block, class),
                    None => self.free_medium(arena, block),
                }
            }
        }
        if let Some(start) = start {
            self.stats.free_time += start.elapsed();
        }
    }

    /// Eagerly creates one arena per small size class, trading memory
    /// for first-touch latency.
    pub fn pre_allocate(&mut self) -> PoolResult<()> {
        for class in 0..CLASS_SIZES.len() {
            if self.small_tables[class].arenas.is_empty() {
                let arena = self.create_small_arena(class)?;
                self.small_tables[class].arenas.push(arena);
            }
        }
        Ok(())
    }

    /// Returns every arena and large block to the page allocator and
    /// resets statistics. Outstanding user pointers become invalid; the
    /// pool afterwards behaves like a freshly constructed one.
    pub fn clear(&mut self) {
        for class in 0..CLASS_SIZES.len() {
            let arenas = std::mem::take(&mut self.small_tables[class].arenas);
            for arena in arenas {
                self.release_arena(arena, RegimeKind::Small);
            }
        }
        let arenas = std::mem::take(&mut self.medium_table.arenas);
        for arena in arenas {
            self.release_arena(arena, RegimeKind::Medium);
        }
        // SAFETY: members of the large list are live headers whose
        // regions came from this page allocator.
        unsafe {
            while let Some(block) = self.large.pop_front() {
                self.release_large_region(block);
            }
        }
        self.stats.reset();
        debug!("pool cleared");
    }

    /// Snapshot of the instrumentation counters, or `None` when
    /// statistics tracking is disabled.
    pub fn collect_statistics(&self) -> Option<PoolStats> {
        self.config.track_stats.then_some(self.stats)
    }

    // ---- small regime -----------------------------------------------

    fn allocate_small(&mut self, aligned: usize) -> PoolResult<NonNull<u8>> {
        let class = self.small_lookup[aligned / 4 - 1] as usize;
        debug_assert_eq!(self.small_tables[class].kind, TableKind::SmallFixed);
        debug_assert!(self.small_tables[class].class_size >= aligned);

        let mut block = None;
        for &arena in &self.small_tables[class].arenas {
            // SAFETY: table members are live small arenas.
            if let Some(found) = unsafe { Arena::take_fixed_block(arena.as_ptr()) } {
                block = Some(found);
                break;
            }
        }
        let block = match block {
            Some(block) => block,
            None => {
                let arena = self.create_small_arena(class)?;
                self.small_tables[class].arenas.push(arena);
                // SAFETY: the arena is live and freshly carved.
                match unsafe { Arena::take_fixed_block(arena.as_ptr()) } {
                    Some(block) => block,
                    None => {
                        return Err(PoolError::BackingAllocationFailed {
                            size: aligned,
                            align: DEFAULT_ALIGN,
                        });
                    }
                }
            }
        };
        if self.config.track_stats {
            // SAFETY: `block` is a live header.
            self.stats
                .record_alloc(RegimeKind::Small, unsafe { (*block).size });
        }
        // SAFETY: `block` is a live header with its class-sized window.
        Ok(unsafe { BlockHeader::user_ptr(block) })
    }

    fn create_small_arena(&mut self, class: usize) -> PoolResult<NonNull<Arena>> {
        let class_size = self.small_tables[class].class_size;
        let region_size = self.page_size * PAGES_PER_ARENA;
        let region = self
            .page_allocator
            .allocate(region_size, REGION_ALIGN, self.user)
            .ok_or(PoolError::BackingAllocationFailed {
                size: region_size,
                align: REGION_ALIGN,
            })?;
        // SAFETY: the region is fresh, exclusively ours and
        // REGION_ALIGN-aligned per the capability contract.
        let arena =
            unsafe { Arena::init_small(region, region_size, TableId::small(class), class_size) };
        if self.config.track_stats {
            self.stats.record_region_alloc(RegimeKind::Small, region_size);
        }
        trace!(class_size, region_size, "created small arena");
        Ok(arena)
    }

    /// # Safety
    /// `arena`/`block` must be a live small arena and one of its used
    /// blocks.
    unsafe fn free_small(&mut self, arena: *mut Arena, block: *mut BlockHeader, class: usize) {
        unsafe {
            let bytes = (*block).size;
            Arena::release_fixed_block(arena, block);
            if self.config.track_stats {
                self.stats.record_free(RegimeKind::Small, bytes);
            }
        }
        if self.config.delete_unused_arenas {
            self.reclaim_small(class);
        }
    }

    /// Stages every empty arena after the first one for release and
    /// returns the staged regions to the page allocator.
    fn reclaim_small(&mut self, class: usize) {
        debug_assert!(self.pending.is_empty());
        let mut pending = std::mem::take(&mut self.pending);
        let mut sentinel_seen = false;
        self.small_tables[class].arenas.retain(|&arena| {
            // SAFETY: table members are live arenas.
            let unused = unsafe { arena.as_ref().is_unused() };
            if unused {
                if sentinel_seen {
                    pending.push(arena);
                    return false;
                }
                sentinel_seen = true;
            }
            true
        });
        for arena in pending.drain(..) {
            // SAFETY: staged arenas are live and hold no used block.
            debug_assert_eq!(unsafe { arena.as_ref() }.used.count(), 0);
            self.release_arena(arena, RegimeKind::Small);
        }
        self.pending = pending;
    }

    // ---- medium regime ----------------------------------------------

    fn allocate_medium(&mut self, aligned: usize) -> PoolResult<NonNull<u8>> {
        // round the gross block size so split-off headers stay aligned
        let needed = align_up(aligned + BlockHeader::SIZE, REGION_ALIGN);
        let mut block = None;
        for &arena in &self.medium_table.arenas {
            // SAFETY: table members are live medium arenas.
            if let Some(found) = unsafe { Arena::take_variable_block(arena.as_ptr(), needed) } {
                block = Some(found);
                break;
            }
        }
        let block = match block {
            Some(block) => block,
            None => {
                let arena = self.create_medium_arena()?;
                self.medium_table.arenas.push(arena);
                // SAFETY: a fresh medium arena holds one free block big
                // enough for any medium-regime request.
                match unsafe { Arena::take_variable_block(arena.as_ptr(), needed) } {
                    Some(block) => block,
                    None => {
                        return Err(PoolError::BackingAllocationFailed {
                            size: aligned,
                            align: DEFAULT_ALIGN,
                        });
                    }
                }
            }
        };
        if self.config.track_stats {
            // SAFETY: `block` is a live header.
            self.stats
                .record_alloc(RegimeKind::Medium, unsafe { (*block).size });
        }
        // SAFETY: `block` is a live header.
        Ok(unsafe { BlockHeader::user_ptr(block) })
    }

    fn create_medium_arena(&mut self) -> PoolResult<NonNull<Arena>> {
        // Gross region: usable medium capacity plus the two headers in
        // front of it, so a request of exactly `medium_max` still fits.
        let region_size = align_up(
            Arena::HEADER + BlockHeader::SIZE + self.medium_max(),
            REGION_ALIGN,
        );
        let region = self
            .page_allocator
            .allocate(region_size, REGION_ALIGN, self.user)
            .ok_or(PoolError::BackingAllocationFailed {
                size: region_size,
                align: REGION_ALIGN,
            })?;
        // SAFETY: fresh exclusive region, REGION_ALIGN-aligned.
        let arena = unsafe { Arena::init_medium(region, region_size) };
        if self.config.track_stats {
            self.stats.record_region_alloc(RegimeKind::Medium, region_size);
        }
        trace!(region_size, "created medium arena");
        Ok(arena)
    }

    /// # Safety
    /// `arena`/`block` must be a live medium arena and one of its used
    /// blocks.
    unsafe fn free_medium(&mut self, arena: *mut Arena, block: *mut BlockHeader) {
        unsafe {
            let bytes = (*block).size;
            Arena::release_variable_block(arena, block);
            if self.config.track_stats {
                self.stats.record_free(RegimeKind::Medium, bytes);
            }
        }
        if self.config.delete_unused_arenas {
            self.reclaim_medium();
        }
    }

    /// Swap-and-pop variant of the reclamation pass for the variable
    /// table.
    fn reclaim_medium(&mut self) {
        debug_assert!(self.pending.is_empty());
        let mut pending = std::mem::take(&mut self.pending);
        let mut sentinel_seen = false;
        let mut i = 0;
        while i < self.medium_table.arenas.len() {
            let arena = self.medium_table.arenas[i];
            // SAFETY: table members are live arenas.
            let unused = unsafe { arena.as_ref().is_unused() };
            if unused && sentinel_seen {
                pending.push(self.medium_table.arenas.swap_remove(i));
                // re-examine whatever swapped into slot i
                continue;
            }
            sentinel_seen |= unused;
            i += 1;
        }
        for arena in pending.drain(..) {
            // SAFETY: staged arenas are live and hold no used block.
            debug_assert_eq!(unsafe { arena.as_ref() }.used.count(), 0);
            self.release_arena(arena, RegimeKind::Medium);
        }
        self.pending = pending;
    }

    // ---- large regime -----------------------------------------------

    fn allocate_large(&mut self, aligned: usize, align: usize) -> PoolResult<NonNull<u8>> {
        let final_size = align_up(aligned + BlockHeader::SIZE, align);
        let request_align = align.max(REGION_ALIGN);
        let region = self
            .page_allocator
            .allocate(final_size, request_align, self.user)
            .ok_or(PoolError::BackingAllocationFailed {
                size: final_size,
                align: request_align,
            })?;
        // The user pointer sits one header past the first multiple of
        // the request alignment; for alignments up to 32 that is the
        // region base itself. Over-aligned headers remember the request
        // alignment in the arena slot so `free` can rebuild this layout.
        let user_offset = align_up(BlockHeader::SIZE, request_align);
        let tag = if request_align > REGION_ALIGN {
            request_align as *mut Arena
        } else {
            ptr::null_mut()
        };
        // SAFETY: the region is fresh and exclusive, `user_offset` never
        // exceeds `final_size - aligned`, and the header lands on an
        // aligned boundary.
        let block = unsafe {
            BlockHeader::init_at(
                region.as_ptr().add(user_offset - BlockHeader::SIZE),
                tag,
                final_size,
            )
        };
        // SAFETY: the large list is pinned behind its Box.
        unsafe { self.large.push_back(block) };
        if self.config.track_stats {
            self.stats.record_alloc(RegimeKind::Large, final_size);
            self.stats.record_region_alloc(RegimeKind::Large, final_size);
        }
        trace!(final_size, request_align, "large passthrough allocation");
        // SAFETY: `block` is a live header.
        Ok(unsafe { BlockHeader::user_ptr(block) })
    }

    /// # Safety
    /// `block` must be a live large-regime header owned by this pool.
    unsafe fn free_large(&mut self, block: *mut BlockHeader) {
        unsafe {
            if self.config.track_stats {
                assert!(
                    self.large.iter().any(|member| member == block),
                    "free of a pointer that is not a live large allocation"
                );
            }
            let bytes = (*block).size;
            BlockList::unlink(block);
            if self.config.track_stats {
                self.stats.record_free(RegimeKind::Large, bytes);
                self.stats.record_region_free(RegimeKind::Large, bytes);
            }
            trace!(bytes, "large passthrough free");
            self.release_large_region(block);
        }
    }

    /// Returns a large block's backing region to the page allocator,
    /// undoing the placement chosen by `allocate_large`.
    ///
    /// # Safety
    /// `block` must be a live large-regime header, already unlinked.
    unsafe fn release_large_region(&mut self, block: *mut BlockHeader) {
        unsafe {
            let tag = (*block).arena as usize;
            let align = if tag == 0 { REGION_ALIGN } else { tag };
            let user_offset = align_up(BlockHeader::SIZE, align);
            let base = block.cast::<u8>().sub(user_offset - BlockHeader::SIZE);
            self.page_allocator.deallocate(
                NonNull::new_unchecked(base),
                (*block).size,
                align,
                self.user,
            );
        }
    }

    // ---- arena release ----------------------------------------------

    fn release_arena(&mut self, arena: NonNull<Arena>, kind: RegimeKind) {
        // SAFETY: `arena` is live and already unlinked from its table.
        let region_size = unsafe { arena.as_ref().region_size };
        if self.config.track_stats {
            self.stats.record_region_free(kind, region_size);
        }
        trace!(region_size, "released arena");
        // SAFETY: exact pair obtained from the page allocator; no live
        // caller pointer may remain inside the region.
        unsafe {
            self.page_allocator
                .deallocate(arena.cast::<u8>(), region_size, REGION_ALIGN, self.user);
        }
    }
}

impl<A: PageAllocator> Drop for Pool<A> {
    fn drop(&mut self) {
        self.clear();
    }
}
