//! Pool configuration.

/// Policy knobs for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Return fully-empty arenas to the page allocator after a free,
    /// keeping one warm sentinel arena per table to absorb churn. With
    /// heavy churn the retained sentinel can keep one arena per distinct
    /// working-set size alive; disable to keep every arena until
    /// [`clear`](crate::Pool::clear).
    pub delete_unused_arenas: bool,

    /// Maintain per-regime counters and operation timings, and verify
    /// large-pointer membership on free.
    pub track_stats: bool,

    /// Fill pattern written over freshly allocated user bytes.
    pub alloc_pattern: Option<u8>,

    /// Fill pattern written over user bytes as they are freed.
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            delete_unused_arenas: true,
            track_stats: cfg!(debug_assertions),
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }
}

impl PoolConfig {
    /// Minimal overhead: no counters, no fill patterns.
    pub fn production() -> Self {
        Self {
            delete_unused_arenas: true,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Full instrumentation plus poison patterns on both paths.
    pub fn debug() -> Self {
        Self {
            delete_unused_arenas: true,
            track_stats: true,
            alloc_pattern: Some(0xAA),
            dealloc_pattern: Some(0xDD),
        }
    }
}
