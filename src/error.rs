//! Error type for pool operations.
//!
//! Allocation failure is the only recoverable error: it is reported at the
//! call site and leaves the pool unchanged. Violated internal invariants are
//! `debug_assert!`s, and freeing a pointer the pool does not own is
//! undefined behaviour (detected for large blocks when statistics are
//! enabled).

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by [`Pool`](crate::Pool) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The backing page allocator returned no memory.
    #[error("backing page allocation of {size} bytes (align {align}) failed")]
    BackingAllocationFailed { size: usize, align: usize },

    /// The configured bulk-allocation unit is below the supported minimum.
    #[error("page size {0} is below the 65536 byte minimum")]
    InvalidPageSize(usize),

    /// Requested alignment is not a power of two, or exceeds the maximum.
    #[error("unsupported alignment {0} (must be a power of two <= 32768)")]
    UnsupportedAlignment(usize),

    /// Allocation requests must be for at least one byte.
    #[error("allocation size must be non-zero")]
    ZeroSize,

    /// Total byte count of an array request overflows `usize`.
    #[error("allocation size overflows usize")]
    SizeOverflow,
}
