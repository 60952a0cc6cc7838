//! Fixed-size blocks on an intrusive free list, never recycled to the host.
//!
//! The cheapest engine: one free-list head, no counters. An idle block's
//! first word holds the pointer to the next idle block; the rest of the block
//! is payload space once allocated. Blocks flow back to the host only when
//! the pool is dropped, so anything a caller still holds at that point leaks.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{host_alloc, host_release, FixedResidual, Pool, HOST_ALIGN};

/// Fixed-size pool backed by a single intrusive free list.
pub struct FixedPool {
    layout: Layout,
    first_free: Option<NonNull<u8>>,
    observer: Option<AllocObserver>,
}

impl FixedPool {
    /// Creates an empty pool serving blocks of `block_size` bytes.
    ///
    /// The block size is clamped up to one machine word so an idle block can
    /// hold its free-list link.
    pub fn new(block_size: usize) -> Result<Self> {
        let size = block_size.max(std::mem::size_of::<usize>());
        let layout = Layout::from_size_align(size, HOST_ALIGN).map_err(|_| Error::LayoutOverflow)?;
        Ok(Self {
            layout,
            first_free: None,
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

    /// Takes a block from the pool, or from the host when the list is empty.
    ///
    /// The returned memory is uninitialized either way: a recycled block
    /// still carries whatever the previous holder wrote (plus the free-list
    /// link in its first word), a fresh one is whatever the host handed over.
    /// Returns `None` when the host allocator refuses.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        if let Some(block) = self.first_free {
            // SAFETY: the first word of a listed block holds the next link,
            // written by `release` or `Drop`-walk below.
            let next = unsafe { block.as_ptr().cast::<*mut u8>().read() };
            self.first_free = NonNull::new(next);
            return Some(block);
        }
        host_alloc(self.layout, self.observer.as_ref())
    }

    /// Idle blocks currently on the free list.
    #[must_use]
    pub fn idle_blocks(&self) -> usize {
        let mut count = 0;
        let mut node = self.first_free;
        while let Some(block) = node {
            // SAFETY: every listed block begins with a valid next link.
            node = NonNull::new(unsafe { block.as_ptr().cast::<*mut u8>().read() });
            count += 1;
        }
        count
    }
}

impl Pool for FixedPool {
    type Residual = FixedResidual;

    fn residual(&self) -> FixedResidual {
        FixedResidual {
            layout: self.layout,
            observer: self.observer.clone(),
        }
    }

    unsafe fn release(&mut self, block: NonNull<u8>) {
        let next = self.first_free.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: blocks are at least one word long (clamped at create) and
        // word-aligned; the caller vouches the block came from this pool and
        // is no longer in use.
        unsafe { block.as_ptr().cast::<*mut u8>().write(next) };
        self.first_free = Some(block);
    }

    unsafe fn release_after_destroy(residual: &FixedResidual, block: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { residual.release(block) };
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        let mut node = self.first_free.take();
        while let Some(block) = node {
            // SAFETY: walking links the pool wrote itself; each block was
            // host-allocated with `self.layout`.
            unsafe {
                node = NonNull::new(block.as_ptr().cast::<*mut u8>().read());
                host_release(block, self.layout, self.observer.as_ref());
            }
        }
    }
}
