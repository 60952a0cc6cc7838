//! # strpool-core
//!
//! Fixed-function memory pools for workloads that churn through small,
//! short-lived buffers, typically strings bounded by a configured maximum
//! length.
//!
//! Six engines cover three design axes: fixed-size versus size-classed
//! blocks, whether idle blocks flow back to the host allocator before the
//! pool is dropped, and free-list versus chunk storage. A benchmark driver
//! compares any engine against the host allocator under a reproducible
//! request pattern.
//!
//! Pools are single-threaded and hand out raw [`std::ptr::NonNull`] blocks;
//! returning a block is `unsafe` because the pool must trust the caller that
//! the pointer is its own and no longer in use. Keep one pool per thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use strpool_core::pool::{FixedPool, Pool};
//!
//! fn main() -> strpool_core::Result<()> {
//!     let mut pool = FixedPool::new(16)?;
//!
//!     let block = pool.alloc().expect("host allocator refused the block");
//!     // SAFETY: the block is at least 16 bytes and ours until released.
//!     unsafe {
//!         block.as_ptr().write(0);
//!         pool.release(block);
//!     }
//!
//!     // The just-freed block comes back first.
//!     assert_eq!(pool.alloc(), Some(block));
//!     # unsafe { pool.release(block) };
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod bench;
pub mod config;
pub mod counters;
pub mod error;
pub mod pool;
pub mod size_class;

pub use error::{Error, Result};
pub use pool::{
    ChunkPool, FixedPool, Pool, PoolSlot, RecyclingFixedPool, RecyclingVarPool, VarPool,
};
