//! Fixed-size free-list pool with a bounded idle count.
//!
//! Same machinery as [`FixedPool`](crate::pool::FixedPool), plus an idle
//! counter and a recycle threshold: a free that would push the idle count
//! past the threshold releases the block to the host instead of listing it.
//! The pool's footprint therefore oscillates under the threshold instead of
//! only growing.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{host_alloc, host_release, FixedResidual, Pool, HOST_ALIGN};

/// Fixed-size pool that keeps at most `threshold` idle blocks.
pub struct RecyclingFixedPool {
    layout: Layout,
    first_free: Option<NonNull<u8>>,
    idle: u16,
    threshold: u16,
    observer: Option<AllocObserver>,
}

impl RecyclingFixedPool {
    /// Creates an empty pool serving `block_size`-byte blocks and retaining
    /// at most `threshold` idle blocks.
    pub fn new(block_size: usize, threshold: u16) -> Result<Self> {
        let size = block_size.max(std::mem::size_of::<usize>());
        let layout = Layout::from_size_align(size, HOST_ALIGN).map_err(|_| Error::LayoutOverflow)?;
        Ok(Self {
            layout,
            first_free: None,
            idle: 0,
            threshold,
            observer: None,
        })
    }

    /// Attaches a host-allocation observer.
    #[must_use]
    pub fn with_observer(mut self, observer: AllocObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Effective block size after clamping.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.layout.size()
    }

    /// Idle blocks currently on the free list.
    #[must_use]
    pub fn idle_blocks(&self) -> u16 {
        self.idle
    }

    /// Takes a block from the pool, or from the host when the list is empty.
    ///
    /// The returned memory is uninitialized. Returns `None` when the host
    /// allocator refuses.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        if let Some(block) = self.first_free {
            // SAFETY: the first word of a listed block holds the next link.
            let next = unsafe { block.as_ptr().cast::<*mut u8>().read() };
            self.first_free = NonNull::new(next);
            self.idle -= 1;
            return Some(block);
        }
        host_alloc(self.layout, self.observer.as_ref())
    }
}

impl Pool for RecyclingFixedPool {
    type Residual = FixedResidual;

    fn residual(&self) -> FixedResidual {
        FixedResidual {
            layout: self.layout,
            observer: self.observer.clone(),
        }
    }

    unsafe fn release(&mut self, block: NonNull<u8>) {
        if self.idle >= self.threshold {
            // SAFETY: the block was host-allocated with the pool's layout;
            // the caller vouches it is no longer in use.
            unsafe { host_release(block, self.layout, self.observer.as_ref()) };
            return;
        }
        let next = self.first_free.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: blocks are at least one word long and word-aligned.
        unsafe { block.as_ptr().cast::<*mut u8>().write(next) };
        self.first_free = Some(block);
        self.idle += 1;
    }

    unsafe fn release_after_destroy(residual: &FixedResidual, block: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { residual.release(block) };
    }
}

impl Drop for RecyclingFixedPool {
    fn drop(&mut self) {
        let mut node = self.first_free.take();
        while let Some(block) = node {
            // SAFETY: walking links the pool wrote itself.
            unsafe {
                node = NonNull::new(block.as_ptr().cast::<*mut u8>().read());
                host_release(block, self.layout, self.observer.as_ref());
            }
        }
    }
}
