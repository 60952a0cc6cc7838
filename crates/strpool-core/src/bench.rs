//! Benchmark driver comparing each pool variant against the host allocator.
//!
//! A run takes two timed passes over the same request pattern: one straight
//! against the host allocator, one through the selected pool. The pattern is
//! `retry_times` outer repetitions of `malloc_times` inner iterations; each
//! inner iteration allocates one block, writes a terminator byte, and frees
//! it. Variable-length passes draw their request lengths from a seeded
//! generator so two runs with one profile issue identical sequences. The
//! chunk pools additionally support a random mode that mixes allocate and
//! free decisions, driven by the same seed.
//!
//! The driver measures wall-clock time only; it is not a correctness check.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::BenchProfile;
use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{
    host_alloc, host_release, ChunkPool, FixedPool, Pool, RecyclingFixedPool, RecyclingVarPool,
    VarPool, HOST_ALIGN,
};

/// The six pool variants the harness can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Fixed-size blocks, free list, no recycling.
    Ful,
    /// Fixed-size blocks, free list, bounded idle count.
    Fal,
    /// Fixed-size blocks, chunk storage, growth disabled.
    Fub,
    /// Fixed-size blocks, chunk storage, growable.
    Fab,
    /// Size-classed blocks, free lists, no recycling.
    Vul,
    /// Size-classed blocks, free lists, bounded idle counts, oversize
    /// tracking.
    Val,
}

impl Variant {
    /// All variants, in tag order.
    pub const ALL: [Self; 6] = [
        Self::Ful,
        Self::Fal,
        Self::Fub,
        Self::Fab,
        Self::Vul,
        Self::Val,
    ];

    /// Whether the variant draws per-request lengths.
    #[must_use]
    pub fn is_variable(self) -> bool {
        matches!(self, Self::Vul | Self::Val)
    }

    /// Whether the variant stores blocks in chunks.
    #[must_use]
    pub fn is_chunked(self) -> bool {
        matches!(self, Self::Fub | Self::Fab)
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Ful => "FUL",
            Self::Fal => "FAL",
            Self::Fub => "FUB",
            Self::Fab => "FAB",
            Self::Vul => "VUL",
            Self::Val => "VAL",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ful" => Ok(Self::Ful),
            "fal" => Ok(Self::Fal),
            "fub" => Ok(Self::Fub),
            "fab" => Ok(Self::Fab),
            "vul" => Ok(Self::Vul),
            "val" => Ok(Self::Val),
            other => Err(Error::UnknownVariant(other.to_string())),
        }
    }
}

/// How the harness interleaves allocs and frees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchMode {
    /// Allocate, touch, free, every iteration.
    #[default]
    Ordering,
    /// Seeded mixed allocate-vs-free decisions (chunk variants only).
    Random,
}

/// Timing summary of one benchmark section.
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Human-readable section name.
    pub section: String,
    /// Allocations per outer repetition.
    pub strings: u32,
    /// Outer repetitions.
    pub repeats: u32,
    /// Wall-clock time across all repetitions.
    pub elapsed: Duration,
}

impl BenchReport {
    /// Elapsed time in whole microseconds.
    #[must_use]
    pub fn micros(&self) -> u128 {
        self.elapsed.as_micros()
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tested, malloc and free {} strings for {} times, cost {} us.",
            self.section,
            self.strings,
            self.repeats,
            self.micros()
        )
    }
}

/// Request lengths for one inner loop, fixed by the profile's seed.
fn draw_lens(profile: &BenchProfile) -> Vec<u16> {
    let mut rng = StdRng::seed_from_u64(profile.seed);
    let max_len = profile.max_len.max(1);
    (0..profile.malloc_times)
        .map(|_| rng.gen_range(1..=max_len))
        .collect()
}

/// Alloc-vs-free decisions for the random mode, fixed by the profile's seed.
fn draw_decisions(profile: &BenchProfile) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(profile.seed);
    (0..profile.malloc_times).map(|_| rng.gen()).collect()
}

/// Runs the request pattern straight against the host allocator.
#[must_use]
pub fn run_host_baseline(variant: Variant, profile: &BenchProfile) -> BenchReport {
    let lens = if variant.is_variable() {
        draw_lens(profile)
    } else {
        (0..profile.malloc_times)
            .map(|_| profile.max_len.max(1))
            .collect()
    };
    let layouts: Vec<Layout> = lens
        .iter()
        .filter_map(|&len| Layout::from_size_align(usize::from(len), HOST_ALIGN).ok())
        .collect();

    let start = Instant::now();
    for _ in 0..profile.retry_times {
        for layout in &layouts {
            let Some(block) = host_alloc(*layout, None) else {
                continue;
            };
            // SAFETY: the block is at least one byte long and exclusively
            // owned until the release just below.
            unsafe {
                block.as_ptr().write(0);
                host_release(block, *layout, None);
            }
        }
    }
    BenchReport {
        section: "System default malloc/free".to_string(),
        strings: profile.malloc_times,
        repeats: profile.retry_times,
        elapsed: start.elapsed(),
    }
}

/// Runs the request pattern through the selected pool variant.
///
/// Pool construction and teardown sit outside the timed window; only the
/// alloc/free loops are measured. An attached observer sees every host
/// allocation the pool makes, teardown included.
pub fn run_pool(
    variant: Variant,
    profile: &BenchProfile,
    observer: Option<AllocObserver>,
) -> Result<BenchReport> {
    let mode = match (profile.mode, variant.is_chunked()) {
        (BenchMode::Random, false) => {
            tracing::warn!(%variant, "random mode is only defined for the chunk variants; running ordering mode");
            BenchMode::Ordering
        }
        (mode, _) => mode,
    };

    let block_size = usize::from(profile.max_len.max(1));
    let elapsed = match variant {
        Variant::Ful => {
            let mut pool = FixedPool::new(block_size)?;
            if let Some(observer) = &observer {
                pool = pool.with_observer(observer.clone());
            }
            run_fixed_ordering(profile, &mut pool, FixedPool::alloc)
        }
        Variant::Fal => {
            let mut pool = RecyclingFixedPool::new(block_size, profile.recycle_threshold)?;
            if let Some(observer) = &observer {
                pool = pool.with_observer(observer.clone());
            }
            run_fixed_ordering(profile, &mut pool, RecyclingFixedPool::alloc)
        }
        Variant::Fub | Variant::Fab => {
            let grow = if variant == Variant::Fub {
                0
            } else {
                profile.grow_chunk_blocks
            };
            let mut pool = ChunkPool::new(block_size, profile.first_chunk_blocks, grow)?;
            if let Some(observer) = &observer {
                pool = pool.with_observer(observer.clone());
            }
            match mode {
                BenchMode::Ordering => run_fixed_ordering(profile, &mut pool, ChunkPool::alloc),
                BenchMode::Random => run_chunk_random(profile, &mut pool),
            }
        }
        Variant::Vul => {
            let mut pool = VarPool::new(profile.max_len, profile.align, profile.bucket_scheme)?;
            if let Some(observer) = &observer {
                pool = pool.with_observer(observer.clone());
            }
            run_var_ordering(profile, &mut pool, VarPool::alloc)
        }
        Variant::Val => {
            let mut pool = RecyclingVarPool::new(
                profile.max_len,
                profile.align,
                profile.bucket_scheme,
                profile.recycle_threshold,
            )?;
            if let Some(observer) = &observer {
                pool = pool.with_observer(observer.clone());
            }
            run_var_ordering(profile, &mut pool, RecyclingVarPool::alloc)
        }
    };

    Ok(BenchReport {
        section: format!("Memory pool Malloc/Free ({variant})"),
        strings: profile.malloc_times,
        repeats: profile.retry_times,
        elapsed,
    })
}

/// Ordering pattern over a fixed-size pool.
fn run_fixed_ordering<P: Pool>(
    profile: &BenchProfile,
    pool: &mut P,
    mut alloc: impl FnMut(&mut P) -> Option<NonNull<u8>>,
) -> Duration {
    let start = Instant::now();
    for _ in 0..profile.retry_times {
        for _ in 0..profile.malloc_times {
            let Some(block) = alloc(pool) else {
                continue;
            };
            // SAFETY: blocks are at least one byte long; each one is
            // released right after the write and never touched again.
            unsafe {
                block.as_ptr().write(0);
                pool.release(block);
            }
        }
    }
    start.elapsed()
}

/// Ordering pattern over a variable-length pool.
fn run_var_ordering<P: Pool>(
    profile: &BenchProfile,
    pool: &mut P,
    mut alloc: impl FnMut(&mut P, u16) -> Option<NonNull<u8>>,
) -> Duration {
    let lens = draw_lens(profile);
    let start = Instant::now();
    for _ in 0..profile.retry_times {
        for &len in &lens {
            let Some(block) = alloc(pool, len) else {
                continue;
            };
            // SAFETY: the block is writable for at least `len >= 1` bytes.
            unsafe {
                block.as_ptr().write(0);
                pool.release(block);
            }
        }
    }
    start.elapsed()
}

/// Random pattern over a chunk pool: a pass of seeded alloc decisions, then a
/// pass of seeded free decisions. Blocks still held at the end die with the
/// pool's chunks.
fn run_chunk_random(profile: &BenchProfile, pool: &mut ChunkPool) -> Duration {
    let decisions = draw_decisions(profile);
    let mut held: Vec<Option<NonNull<u8>>> = vec![None; decisions.len()];
    let start = Instant::now();
    for _ in 0..profile.retry_times {
        for (slot, decision) in held.iter_mut().zip(&decisions) {
            if decision % 2 == 1 && slot.is_none() {
                if let Some(block) = pool.alloc() {
                    // SAFETY: chunk blocks are at least two bytes long.
                    unsafe { block.as_ptr().write(0) };
                    *slot = Some(block);
                }
            }
        }
        for (slot, decision) in held.iter_mut().zip(&decisions) {
            if decision % 3 != 0 {
                if let Some(block) = slot.take() {
                    // SAFETY: the block came from `pool.alloc` above and is
                    // not used past this point.
                    unsafe { pool.release(block) };
                }
            }
        }
    }
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_profile() -> BenchProfile {
        BenchProfile {
            max_len: 64,
            malloc_times: 128,
            retry_times: 3,
            first_chunk_blocks: 8,
            grow_chunk_blocks: 4,
            ..BenchProfile::default()
        }
    }

    #[test]
    fn test_variant_tags_round_trip() {
        for variant in Variant::ALL {
            let parsed: Variant = variant.to_string().parse().unwrap();
            assert_eq!(parsed, variant);
        }
        assert!(matches!(
            "xyz".parse::<Variant>(),
            Err(Error::UnknownVariant(_))
        ));
    }

    #[test]
    fn test_every_variant_completes_the_ordering_pattern() {
        let profile = small_profile();
        for variant in Variant::ALL {
            let observer = AllocObserver::new();
            let report = run_pool(variant, &profile, Some(observer.clone())).unwrap();
            assert_eq!(report.strings, profile.malloc_times);
            assert_eq!(report.repeats, profile.retry_times);
            assert!(observer.is_balanced(), "{variant} leaked host memory");
        }
    }

    #[test]
    fn test_random_mode_reclaims_everything_via_chunks() {
        let profile = BenchProfile {
            mode: BenchMode::Random,
            ..small_profile()
        };
        let observer = AllocObserver::new();
        run_pool(Variant::Fab, &profile, Some(observer.clone())).unwrap();
        assert!(observer.is_balanced());
    }

    #[test]
    fn test_baseline_reports_the_profile_counts() {
        let profile = small_profile();
        let report = run_host_baseline(Variant::Vul, &profile);
        assert_eq!(report.strings, 128);
        assert_eq!(report.repeats, 3);
        assert!(report.to_string().contains("System default malloc/free"));
    }
}
