//! Size rounding and bucket indexing for the variable-length pools.
//!
//! Variable-length pools file idle blocks into buckets keyed by a size class.
//! Two indexing schemes exist: the historical one, whose divisor is
//! `align - 1` and therefore produces buckets narrower than the alignment
//! step, and a uniform one where every bucket spans exactly `align` sizes.
//! Allocation and free must use the same scheme on one pool; the scheme is
//! part of the pool's configuration.

use serde::{Deserialize, Serialize};

/// Hard cap on the length a variable pool can serve from its buckets.
///
/// Lengths are recorded in a two-byte prefix ahead of every block, so the cap
/// is the largest value that prefix can hold.
pub const MAX_BLOCK_LEN: u16 = u16::MAX;

/// Rounds `n` up to the next multiple of `align` (`align` must be a power of
/// two).
#[inline]
#[must_use]
pub fn round_up(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

/// Bucket indexing scheme used by the variable-length pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketScheme {
    /// Historical indexing: `((n + align - 1) / (align - 1)) - 1`.
    ///
    /// The divisor is `align - 1`, one short of the alignment step, so bucket
    /// widths are `align - 1` sizes and drift away from the rounded-up byte
    /// sizes as lengths grow. Kept as the default because a pool's free lists
    /// are only coherent when both ends of the block lifecycle agree on it.
    #[default]
    Legacy,
    /// Corrected indexing: `((n + align - 1) / align) - 1`, giving uniform
    /// buckets of exactly `align` sizes each.
    Uniform,
}

impl BucketScheme {
    /// Returns the bucket index serving a block of length `len`.
    #[inline]
    #[must_use]
    pub fn bucket(self, len: u16, align: usize) -> usize {
        debug_assert!(len > 0);
        let n = usize::from(len);
        match self {
            Self::Legacy => (n + align - 1) / (align - 1) - 1,
            Self::Uniform => (n + align - 1) / align - 1,
        }
    }

    /// Largest length filed into bucket `class`.
    #[inline]
    #[must_use]
    pub fn upper_bound(self, class: usize, align: usize) -> usize {
        match self {
            Self::Legacy => (align - 1) * class + align - 2,
            Self::Uniform => align * (class + 1),
        }
    }

    /// Byte capacity of every block filed into bucket `class`.
    ///
    /// All blocks of one bucket share this capacity, so any block popped from
    /// the bucket's free list is writable for any length the bucket serves.
    #[inline]
    #[must_use]
    pub fn capacity(self, class: usize, align: usize) -> usize {
        round_up(self.upper_bound(class, align), align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_align_8() {
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 8), 16);
        assert_eq!(round_up(1024, 8), 1024);
    }

    #[test]
    fn test_legacy_bucket_values() {
        let s = BucketScheme::Legacy;
        // Widths are align - 1 = 7 sizes, so 7..=13 share a bucket while the
        // rounded byte sizes (8 vs 16) do not.
        assert_eq!(s.bucket(1, 8), 0);
        assert_eq!(s.bucket(6, 8), 0);
        assert_eq!(s.bucket(7, 8), 1);
        assert_eq!(s.bucket(8, 8), 1);
        assert_eq!(s.bucket(13, 8), 1);
        assert_eq!(s.bucket(14, 8), 2);
        assert_eq!(s.bucket(1024, 8), 146);
    }

    #[test]
    fn test_uniform_bucket_values() {
        let s = BucketScheme::Uniform;
        assert_eq!(s.bucket(1, 8), 0);
        assert_eq!(s.bucket(8, 8), 0);
        assert_eq!(s.bucket(9, 8), 1);
        assert_eq!(s.bucket(16, 8), 1);
        assert_eq!(s.bucket(1024, 8), 127);
    }

    #[test]
    fn test_upper_bound_closes_each_bucket() {
        for scheme in [BucketScheme::Legacy, BucketScheme::Uniform] {
            for class in 0..64 {
                let upper = scheme.upper_bound(class, 8);
                if upper == 0 || upper > usize::from(MAX_BLOCK_LEN) {
                    continue;
                }
                #[allow(clippy::cast_possible_truncation)]
                // upper <= MAX_BLOCK_LEN is checked above.
                let upper16 = upper as u16;
                assert_eq!(scheme.bucket(upper16, 8), class);
                assert_eq!(scheme.bucket(upper16 + 1, 8), class + 1);
            }
        }
    }

    #[test]
    fn test_capacity_covers_every_length_in_bucket() {
        for scheme in [BucketScheme::Legacy, BucketScheme::Uniform] {
            for len in 1..=2048_u16 {
                let class = scheme.bucket(len, 8);
                assert!(scheme.capacity(class, 8) >= usize::from(len));
                assert!(scheme.capacity(class, 8) >= round_up(usize::from(len), 8));
            }
        }
    }

    #[test]
    fn test_schemes_work_for_small_aligns() {
        for align in [2_usize, 4, 16, 64] {
            for len in 1..=512_u16 {
                let class = BucketScheme::Legacy.bucket(len, align);
                assert!(BucketScheme::Legacy.capacity(class, align) >= usize::from(len));
            }
        }
    }
}
