//! Per-regime instrumentation counters.

use core::fmt;
use std::time::Duration;

use crate::utils::format_bytes;

/// Which dispatch path served an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegimeKind {
    Small,
    Medium,
    Large,
}

/// Counters for one size regime.
///
/// Byte figures count whole blocks, header included, matching what the
/// regime actually consumes inside its arenas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegimeStats {
    /// Cumulative number of allocations served.
    pub allocations: u64,
    /// Cumulative number of frees.
    pub deallocations: u64,
    /// Cumulative bytes handed out.
    pub allocated_bytes: u64,
    /// Cumulative bytes returned.
    pub deallocated_bytes: u64,
    /// Blocks currently held by callers.
    pub live_blocks: u64,
    /// Bytes currently held by callers.
    pub live_bytes: u64,
    /// Backing regions (arenas, or large blocks) currently held.
    pub regions: u64,
    /// Bytes currently obtained from the page allocator.
    pub region_bytes: u64,
}

/// Snapshot of a pool's instrumentation state.
///
/// Returned by [`Pool::collect_statistics`](crate::Pool::collect_statistics)
/// when tracking is enabled; the [`Display`](fmt::Display) impl renders a
/// human-readable report.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub small: RegimeStats,
    pub medium: RegimeStats,
    pub large: RegimeStats,
    /// Accumulated wall-clock time spent in `allocate`.
    pub alloc_time: Duration,
    /// Accumulated wall-clock time spent in `free`.
    pub free_time: Duration,
}

impl PoolStats {
    pub(crate) fn regime_mut(&mut self, kind: RegimeKind) -> &mut RegimeStats {
        match kind {
            RegimeKind::Small => &mut self.small,
            RegimeKind::Medium => &mut self.medium,
            RegimeKind::Large => &mut self.large,
        }
    }

    pub(crate) fn record_alloc(&mut self, kind: RegimeKind, bytes: usize) {
        let regime = self.regime_mut(kind);
        regime.allocations += 1;
        regime.allocated_bytes += bytes as u64;
        regime.live_blocks += 1;
        regime.live_bytes += bytes as u64;
    }

    pub(crate) fn record_free(&mut self, kind: RegimeKind, bytes: usize) {
        let regime = self.regime_mut(kind);
        regime.deallocations += 1;
        regime.deallocated_bytes += bytes as u64;
        regime.live_blocks -= 1;
        regime.live_bytes -= bytes as u64;
    }

    pub(crate) fn record_region_alloc(&mut self, kind: RegimeKind, bytes: usize) {
        let regime = self.regime_mut(kind);
        regime.regions += 1;
        regime.region_bytes += bytes as u64;
    }

    pub(crate) fn record_region_free(&mut self, kind: RegimeKind, bytes: usize) {
        let regime = self.regime_mut(kind);
        regime.regions -= 1;
        regime.region_bytes -= bytes as u64;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Total number of blocks currently held by callers.
    pub fn live_blocks(&self) -> u64 {
        self.small.live_blocks + self.medium.live_blocks + self.large.live_blocks
    }

    /// Total bytes currently obtained from the page allocator.
    pub fn footprint(&self) -> u64 {
        self.small.region_bytes + self.medium.region_bytes + self.large.region_bytes
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pool statistics")?;
        writeln!(
            f,
            "  time alloc/free (ms): {:.3}/{:.3}",
            self.alloc_time.as_secs_f64() * 1000.0,
            self.free_time.as_secs_f64() * 1000.0
        )?;
        for (name, regime) in [
            ("small ", &self.small),
            ("medium", &self.medium),
            ("large ", &self.large),
        ] {
            writeln!(
                f,
                "  {name} - live {} blocks / {}, allocations {}, regions {} ({})",
                regime.live_blocks,
                format_bytes(regime.live_bytes as usize),
                regime.allocations,
                regime.regions,
                format_bytes(regime.region_bytes as usize),
            )?;
        }
        write!(
            f,
            "  footprint: {} across {} live blocks",
            format_bytes(self.footprint() as usize),
            self.live_blocks()
        )
    }
}
