//! Benchmark executable for the strpool memory pools.
//!
//! Runs the host-allocator baseline and the selected pool variant over one
//! request pattern and prints one timing line per section. The profile is
//! layered from defaults, an optional TOML file, `STRPOOL_*` environment
//! variables, and the command-line overrides below.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use strpool_core::bench::{self, BenchMode, Variant};
use strpool_core::config::BenchProfile;
use strpool_core::counters::AllocObserver;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    Ful,
    Fal,
    Fub,
    Fab,
    Vul,
    Val,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Ful => Variant::Ful,
            VariantArg::Fal => Variant::Fal,
            VariantArg::Fub => Variant::Fub,
            VariantArg::Fab => Variant::Fab,
            VariantArg::Vul => Variant::Vul,
            VariantArg::Val => Variant::Val,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Ordering,
    Random,
}

impl From<ModeArg> for BenchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Ordering => BenchMode::Ordering,
            ModeArg::Random => BenchMode::Random,
        }
    }
}

/// Benchmark the strpool memory pools against the host allocator.
#[derive(Debug, Parser)]
#[command(name = "strpool", version, about)]
struct Args {
    /// Pool variant to benchmark.
    #[arg(long, value_enum, default_value = "ful")]
    variant: VariantArg,

    /// Benchmark profile file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Alloc/free interleaving; random is defined for the chunk variants.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Override the profile's maximum block length.
    #[arg(long)]
    max_len: Option<u16>,

    /// Override the profile's allocations per inner loop.
    #[arg(long)]
    malloc_times: Option<u32>,

    /// Override the profile's outer repetitions.
    #[arg(long)]
    retry_times: Option<u32>,

    /// Override the profile's sequence seed.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        if !path.exists() {
            bail!("profile {} does not exist", path.display());
        }
    }

    let mut profile =
        BenchProfile::load(args.config.as_deref()).context("loading benchmark profile")?;
    if let Some(mode) = args.mode {
        profile.mode = mode.into();
    }
    if let Some(max_len) = args.max_len {
        profile.max_len = max_len;
    }
    if let Some(malloc_times) = args.malloc_times {
        profile.malloc_times = malloc_times;
    }
    if let Some(retry_times) = args.retry_times {
        profile.retry_times = retry_times;
    }
    if let Some(seed) = args.seed {
        profile.seed = seed;
    }

    let variant = Variant::from(args.variant);
    tracing::info!(%variant, ?profile, "benchmarking");

    println!("{}", bench::run_host_baseline(variant, &profile));

    let observer = AllocObserver::new();
    let report = bench::run_pool(variant, &profile, Some(observer.clone()))
        .context("setting up the pool benchmark")?;
    println!("{report}");
    observer.log_summary();
    if !observer.is_balanced() {
        tracing::warn!(
            outstanding = observer.outstanding(),
            "pool run left host allocations outstanding"
        );
    }

    Ok(())
}
