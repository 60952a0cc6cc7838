//! Criterion benchmarks comparing each pool engine against the host
//! allocator on the allocate/touch/free round trip.

use std::alloc::Layout;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strpool_core::pool::{ChunkPool, FixedPool, Pool, RecyclingVarPool, VarPool};
use strpool_core::size_class::BucketScheme;

const BLOCK_SIZE: usize = 64;
const ROUND_TRIPS: usize = 128;

/// Deterministic request lengths, spread across the size classes.
fn request_lens(max_len: u16) -> Vec<u16> {
    let mut seed = 0x5eed_u32;
    (0..ROUND_TRIPS)
        .map(|_| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((seed >> 16) as u16) % max_len + 1
        })
        .collect()
}

// =============================================================================
// Fixed-size round trips
// =============================================================================

fn bench_fixed_host_baseline(c: &mut Criterion) {
    let layout = Layout::from_size_align(BLOCK_SIZE, std::mem::align_of::<usize>()).unwrap();
    c.bench_function("fixed_host_baseline", |b| {
        b.iter(|| {
            for _ in 0..ROUND_TRIPS {
                unsafe {
                    let ptr = std::alloc::alloc(layout);
                    assert!(!ptr.is_null());
                    ptr.write(0);
                    std::alloc::dealloc(black_box(ptr), layout);
                }
            }
        });
    });
}

fn bench_fixed_list_pool(c: &mut Criterion) {
    c.bench_function("fixed_list_pool", |b| {
        let mut pool = FixedPool::new(BLOCK_SIZE).unwrap();
        b.iter(|| {
            for _ in 0..ROUND_TRIPS {
                let block = pool.alloc().unwrap();
                unsafe {
                    block.as_ptr().write(0);
                    pool.release(black_box(block));
                }
            }
        });
    });
}

fn bench_fixed_chunk_pool(c: &mut Criterion) {
    c.bench_function("fixed_chunk_pool", |b| {
        let mut pool = ChunkPool::new(BLOCK_SIZE, 99, 64).unwrap();
        b.iter(|| {
            for _ in 0..ROUND_TRIPS {
                let block = pool.alloc().unwrap();
                unsafe {
                    block.as_ptr().write(0);
                    pool.release(black_box(block));
                }
            }
        });
    });
}

// =============================================================================
// Size-classed round trips
// =============================================================================

fn bench_var_pools(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_round_trip");

    for max_len in [256_u16, 1024] {
        let lens = request_lens(max_len);
        group.throughput(Throughput::Elements(ROUND_TRIPS as u64));

        group.bench_with_input(BenchmarkId::new("host", max_len), &lens, |b, lens| {
            b.iter(|| {
                for &len in lens {
                    let layout =
                        Layout::from_size_align(usize::from(len), std::mem::align_of::<usize>())
                            .unwrap();
                    unsafe {
                        let ptr = std::alloc::alloc(layout);
                        assert!(!ptr.is_null());
                        ptr.write(0);
                        std::alloc::dealloc(black_box(ptr), layout);
                    }
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("var_list", max_len), &lens, |b, lens| {
            let mut pool = VarPool::new(max_len, 8, BucketScheme::Legacy).unwrap();
            b.iter(|| {
                for &len in lens {
                    let block = pool.alloc(len).unwrap();
                    unsafe {
                        block.as_ptr().write(0);
                        pool.release(black_box(block));
                    }
                }
            });
        });

        group.bench_with_input(
            BenchmarkId::new("var_recycle", max_len),
            &lens,
            |b, lens| {
                let mut pool = RecyclingVarPool::new(max_len, 8, BucketScheme::Legacy, 16).unwrap();
                b.iter(|| {
                    for &len in lens {
                        let block = pool.alloc(len).unwrap();
                        unsafe {
                            block.as_ptr().write(0);
                            pool.release(black_box(block));
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fixed_host_baseline,
    bench_fixed_list_pool,
    bench_fixed_chunk_pool,
    bench_var_pools,
);

criterion_main!(benches);
