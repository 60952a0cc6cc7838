//! Error types for strpool-core.

use thiserror::Error;

/// Pool and benchmark error types.
///
/// Host-allocator refusals during block acquisition are not errors; they
/// surface as a `None` block plus a logged diagnostic, because callers on the
/// allocation path check for the missing block rather than unwind.
#[derive(Error, Debug)]
pub enum Error {
    /// Chunk geometry (`blocks * block_size`) does not fit the address space.
    #[error("pool geometry overflows the address space")]
    LayoutOverflow,

    /// A chunk pool was configured with an empty first chunk.
    #[error("chunk pools need at least one block in the first chunk")]
    ZeroBlocks,

    /// The bucketing alignment is not a power of two of at least 2.
    #[error("align must be a power of two of at least 2, got {0}")]
    InvalidAlign(usize),

    /// An unrecognized pool variant tag.
    #[error("unknown pool variant `{0}` (expected ful, fal, fub, fab, vul or val)")]
    UnknownVariant(String),

    /// The benchmark profile failed to load.
    #[error("benchmark profile error: {0}")]
    Profile(#[from] Box<figment::Error>),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Profile(Box::new(err))
    }
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidAlign(6);
        assert_eq!(err.to_string(), "align must be a power of two of at least 2, got 6");
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = Error::UnknownVariant("xyz".to_string());
        assert!(err.to_string().contains("xyz"));
    }
}
