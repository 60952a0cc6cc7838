//! Benchmark profile loading.
//!
//! A profile collects every tunable the harness and the pools consume:
//! maximum block length, loop counts, chunk geometry, alignment step,
//! recycle threshold, bucketing scheme, run mode, and the seed for the
//! reproducible request sequences. Values are layered figment-style:
//! built-in defaults, then an optional `strpool.toml`, then `STRPOOL_*`
//! environment variables.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::bench::BenchMode;
use crate::error::{Error, Result};
use crate::size_class::BucketScheme;

/// Name of the profile file picked up from the working directory.
pub const DEFAULT_PROFILE_FILE: &str = "strpool.toml";

/// Prefix of the environment variables merged over the profile file.
pub const ENV_PREFIX: &str = "STRPOOL_";

/// Tunables for a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchProfile {
    /// Largest block length exercised (and the fixed pools' block size).
    pub max_len: u16,
    /// Allocations per inner loop.
    pub malloc_times: u32,
    /// Outer repetitions of the inner loop.
    pub retry_times: u32,
    /// Blocks in a chunk pool's first chunk.
    pub first_chunk_blocks: u16,
    /// Blocks per grown chunk; `0` forbids growth.
    pub grow_chunk_blocks: u16,
    /// Alignment step of the variable pools (power of two).
    pub align: usize,
    /// Idle blocks a recycling pool retains per bucket before releasing to
    /// the host.
    pub recycle_threshold: u16,
    /// Bucket indexing scheme for the variable pools.
    pub bucket_scheme: BucketScheme,
    /// Ordering (alloc, touch, free) or random mixed alloc/free decisions.
    pub mode: BenchMode,
    /// Seed for the request-length and decision sequences.
    pub seed: u64,
}

impl Default for BenchProfile {
    fn default() -> Self {
        Self {
            max_len: 1024,
            malloc_times: 9999,
            retry_times: 9999,
            first_chunk_blocks: 99,
            grow_chunk_blocks: 64,
            align: 8,
            recycle_threshold: 16,
            bucket_scheme: BucketScheme::Legacy,
            mode: BenchMode::Ordering,
            seed: 42,
        }
    }
}

impl BenchProfile {
    /// Loads a profile: defaults, then `path` (or `strpool.toml` when no
    /// path is given), then `STRPOOL_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_PROFILE_FILE),
        };
        let profile: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks cross-field constraints the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if !self.align.is_power_of_two() || self.align < 2 {
            return Err(Error::InvalidAlign(self.align));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_match_the_shipped_constants() {
        let profile = BenchProfile::default();
        assert_eq!(profile.max_len, 1024);
        assert_eq!(profile.malloc_times, 9999);
        assert_eq!(profile.retry_times, 9999);
        assert_eq!(profile.first_chunk_blocks, 99);
        assert_eq!(profile.grow_chunk_blocks, 64);
        assert_eq!(profile.align, 8);
        assert_eq!(profile.bucket_scheme, BucketScheme::Legacy);
        assert_eq!(profile.mode, BenchMode::Ordering);
        profile.validate().unwrap();
    }

    #[test]
    fn test_profile_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "max_len = 256\nretry_times = 7\nbucket_scheme = \"uniform\"\nmode = \"random\""
        )
        .unwrap();

        let profile = BenchProfile::load(Some(file.path())).unwrap();
        assert_eq!(profile.max_len, 256);
        assert_eq!(profile.retry_times, 7);
        assert_eq!(profile.bucket_scheme, BucketScheme::Uniform);
        assert_eq!(profile.mode, BenchMode::Random);
        // Untouched fields keep their defaults.
        assert_eq!(profile.malloc_times, 9999);
    }

    #[test]
    fn test_invalid_align_is_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "align = 6").unwrap();

        let err = BenchProfile::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::InvalidAlign(6)));
    }
}
