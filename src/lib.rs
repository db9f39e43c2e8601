//! # pagepool
//!
//! A general-purpose memory pool that multiplexes three allocation
//! strategies over bulk memory obtained from a pluggable [`PageAllocator`]:
//!
//! - **small** requests (≤ 32 KiB, default alignment) are served from
//!   segregated fixed-size free lists, one per size class;
//! - **medium** requests (up to sixteen pages) are carved out of coalescing
//!   variable-block arenas;
//! - everything else is a **large** passthrough to the page allocator,
//!   tracked individually.
//!
//! Every returned pointer is prefixed by an in-band block header, which
//! makes `free` O(1) without a global lookup table. A [`Pool`] is
//! single-owner: all operations take `&mut self`, and two pools are fully
//! independent.
//!
//! ```
//! use pagepool::Pool;
//!
//! let mut pool = Pool::new(64 * 1024).unwrap();
//! let ptr = pool.allocate_default(48).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 48);
//!     pool.free(ptr);
//! }
//! ```

mod arena;
mod block;
mod classes;
pub mod error;
pub mod page;
pub mod pool;
pub mod utils;

pub use classes::{
    CLASS_SIZES, DEFAULT_ALIGN, MAX_ALIGN, MAX_LARGE_ALIGN, MIN_PAGE_SIZE, PAGES_PER_ARENA,
    SMALL_MAX,
};
pub use error::{PoolError, PoolResult};
#[cfg(unix)]
pub use page::MmapPageAllocator;
#[cfg(windows)]
pub use page::VirtualPageAllocator;
pub use page::{PageAllocator, SystemPageAllocator, default_page_allocator};
pub use pool::{Pool, PoolConfig, PoolStats, RegimeStats};
