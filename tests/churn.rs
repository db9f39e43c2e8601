//! Churn workloads: shuffled free order and randomized op sequences.

mod common;

use core::ptr;
use std::slice;

use common::TrackingPageAllocator;
use pagepool::{MIN_PAGE_SIZE, Pool, PoolConfig, SMALL_MAX};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const PAGE: usize = MIN_PAGE_SIZE;

fn instrumented_pool(
    tracker: &TrackingPageAllocator,
) -> Pool<&TrackingPageAllocator> {
    let mut config = PoolConfig::default();
    config.track_stats = true;
    Pool::with_config(PAGE, tracker, ptr::null_mut(), config).unwrap()
}

#[test]
fn interleaved_churn_with_shuffled_frees() {
    let tracker = TrackingPageAllocator::new();
    let mut pool = instrumented_pool(&tracker);

    let mut live = Vec::new();
    for size in (1..=SMALL_MAX).step_by(13) {
        let ptr = pool.allocate_default(size).unwrap();
        let fill = (size % 251) as u8;
        unsafe { ptr.as_ptr().write_bytes(fill, size) };
        live.push((ptr, size, fill));
    }

    let mut rng = StdRng::seed_from_u64(0x9E37_79B9);
    live.shuffle(&mut rng);

    for (ptr, size, fill) in live {
        unsafe {
            // no other allocation may have touched this window
            let window = slice::from_raw_parts(ptr.as_ptr(), size);
            assert!(window.iter().all(|&b| b == fill), "clobbered {size}-byte block");
            pool.free(ptr);
        }
    }

    let stats = pool.collect_statistics().unwrap();
    assert_eq!(stats.small.live_blocks, 0);
    // at most the one retained sentinel arena per touched class
    assert!(stats.small.regions <= pagepool::CLASS_SIZES.len() as u64);
    assert_eq!(stats.small.regions, tracker.live_regions.get() as u64);
}

#[test]
fn alternating_medium_churn_keeps_footprint_bounded() {
    let tracker = TrackingPageAllocator::new();
    let mut pool = instrumented_pool(&tracker);

    for _ in 0..10_000 {
        let ptr = pool.allocate_default(SMALL_MAX * 2).unwrap();
        unsafe { pool.free(ptr) };
    }

    // one arena absorbs the whole sequence
    assert_eq!(tracker.allocate_calls.get(), 1);
    assert_eq!(tracker.live_regions.get(), 1);
    let stats = pool.collect_statistics().unwrap();
    assert_eq!(stats.medium.regions, 1);
    assert_eq!(stats.medium.live_blocks, 0);
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    FreeOldest,
    FreeNewest,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..150_000).prop_map(Op::Alloc),
        1 => Just(Op::FreeOldest),
        1 => Just(Op::FreeNewest),
    ]
}

/// Checks the block's fill pattern survived, then frees it.
fn verify_and_free<A: pagepool::PageAllocator>(
    pool: &mut Pool<A>,
    (ptr, size, fill): (core::ptr::NonNull<u8>, usize, u8),
) -> Result<(), TestCaseError> {
    unsafe {
        let window = slice::from_raw_parts(ptr.as_ptr(), size);
        prop_assert!(window.iter().all(|&b| b == fill));
        pool.free(ptr);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_op_sequences_preserve_isolation(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let tracker = TrackingPageAllocator::new();
        let mut pool = instrumented_pool(&tracker);
        let mut live: Vec<(core::ptr::NonNull<u8>, usize, u8)> = Vec::new();

        for (seq, op) in ops.into_iter().enumerate() {
            match op {
                Op::Alloc(size) => {
                    let fill = (seq % 251) as u8;
                    let ptr = pool.allocate_default(size).unwrap();
                    unsafe { ptr.as_ptr().write_bytes(fill, size) };
                    live.push((ptr, size, fill));
                }
                Op::FreeOldest => {
                    if !live.is_empty() {
                        verify_and_free(&mut pool, live.remove(0))?;
                    }
                }
                Op::FreeNewest => {
                    if let Some(entry) = live.pop() {
                        verify_and_free(&mut pool, entry)?;
                    }
                }
            }
        }

        for entry in live.drain(..) {
            verify_and_free(&mut pool, entry)?;
        }

        let stats = pool.collect_statistics().unwrap();
        prop_assert_eq!(stats.live_blocks(), 0);
        drop(pool);
        prop_assert_eq!(tracker.live_regions.get(), 0);
    }
}
