//! Small-allocation churn: pool vs. the system allocator.

use std::alloc::{Layout, alloc, dealloc};

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pagepool::Pool;

const PAGE: usize = 64 * 1024;
const SIZES: [usize; 6] = [16, 48, 96, 256, 1024, 4096];

fn pool_churn(c: &mut Criterion) {
    let mut pool = Pool::new(PAGE).unwrap();
    pool.pre_allocate().unwrap();

    c.bench_function("pool_small_churn", |b| {
        b.iter(|| {
            for &size in &SIZES {
                let ptr = pool.allocate_default(black_box(size)).unwrap();
                unsafe {
                    ptr.as_ptr().write(0x42);
                    pool.free(ptr);
                }
            }
        });
    });
}

fn system_churn(c: &mut Criterion) {
    c.bench_function("system_small_churn", |b| {
        b.iter(|| {
            for &size in &SIZES {
                let layout = Layout::from_size_align(black_box(size), 4).unwrap();
                unsafe {
                    let ptr = alloc(layout);
                    assert!(!ptr.is_null());
                    ptr.write(0x42);
                    dealloc(ptr, layout);
                }
            }
        });
    });
}

fn mixed_lifetimes(c: &mut Criterion) {
    let mut pool = Pool::new(PAGE).unwrap();

    c.bench_function("pool_mixed_lifetimes", |b| {
        b.iter(|| {
            let mut held = Vec::with_capacity(32);
            for i in 0..32usize {
                let size = 16 + (i * 37) % 2048;
                held.push(pool.allocate_default(size).unwrap());
            }
            for ptr in held.drain(..) {
                unsafe { pool.free(ptr) };
            }
        });
    });
}

criterion_group!(benches, pool_churn, system_churn, mixed_lifetimes);
criterion_main!(benches);
