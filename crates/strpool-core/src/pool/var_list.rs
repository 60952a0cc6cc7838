//! Size-classed blocks on per-bucket free lists, never recycled to the host.
//!
//! Every block is prefixed by two bytes recording the length it was handed
//! out for; the caller's pointer points just past the prefix. A free steps
//! back over the prefix, reads the length, and files the whole block into the
//! bucket serving that length. While a block is idle, its leading word holds
//! the free-list link instead (the prefix is rewritten on the next hand-out).

use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{host_alloc, host_release, var_class_layout, Pool, VarResidual, LEN_PREFIX};
use crate::size_class::BucketScheme;

/// Variable-length pool with one free list per size class.
pub struct VarPool {
    max_len: u16,
    align: usize,
    scheme: BucketScheme,
    table: Box<[Option<NonNull<u8>>]>,
    observer: Option<AllocObserver>,
}

impl VarPool {
    /// Creates a pool serving lengths `1..=max_len`, bucketed by `scheme`
    /// with the given alignment step.
    pub fn new(max_len: u16, align: usize, scheme: BucketScheme) -> Result<Self> {
        if !align.is_power_of_two() || align < 2 {
            return Err(Error::InvalidAlign(align));
        }
        let classes = scheme.bucket(max_len.max(1), align) + 1;
        Ok(Self {
            max_len,
            align,
            scheme,
            table: vec![None; classes].into_boxed_slice(),
            observer: None,
        })
    }

    /// Attaches a host-allocation observer.
    #[must_use]
    pub fn with_observer(mut self, observer: AllocObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Largest length the pool serves.
    #[must_use]
    pub fn max_len(&self) -> u16 {
        self.max_len
    }

    /// Idle blocks currently filed in the bucket serving `len`.
    #[must_use]
    pub fn idle_count(&self, len: u16) -> usize {
        let class = self.scheme.bucket(len.min(self.max_len).max(1), self.align);
        let mut count = 0;
        let mut node = self.table[class];
        while let Some(block) = node {
            // SAFETY: every listed block begins with a valid next link.
            node = NonNull::new(unsafe { block.as_ptr().cast::<*mut u8>().read() });
            count += 1;
        }
        count
    }

    /// Takes a block writable for at least `len` bytes.
    ///
    /// Served from the length's bucket when it has an idle block, otherwise
    /// from the host. Returns `None` when the host refuses or when `len`
    /// exceeds the pool's maximum (logged as a warning; this pool does not
    /// track oversize traffic).
    ///
    /// # Panics
    ///
    /// Panics when `len` is zero.
    pub fn alloc(&mut self, len: u16) -> Option<NonNull<u8>> {
        assert!(len != 0, "variable pools cannot serve zero-length requests");
        if len > self.max_len {
            tracing::warn!(
                len,
                max_len = self.max_len,
                "request exceeds the pool's maximum block length"
            );
            return None;
        }
        let class = self.scheme.bucket(len, self.align);
        let base = match self.table[class] {
            Some(block) => {
                // SAFETY: the leading word of a listed block is its link.
                let next = unsafe { block.as_ptr().cast::<*mut u8>().read() };
                self.table[class] = NonNull::new(next);
                block
            }
            None => host_alloc(
                var_class_layout(self.scheme, self.align, class)?,
                self.observer.as_ref(),
            )?,
        };
        // SAFETY: the block base is word-aligned and at least prefix + one
        // bucket capacity long; the prefix overwrites the old link bytes.
        unsafe {
            base.as_ptr().cast::<u16>().write(len);
            Some(NonNull::new_unchecked(base.as_ptr().add(LEN_PREFIX)))
        }
    }
}

impl Pool for VarPool {
    type Residual = VarResidual;

    fn residual(&self) -> VarResidual {
        VarResidual {
            max_len: self.max_len,
            align: self.align,
            scheme: self.scheme,
            observer: self.observer.clone(),
        }
    }

    unsafe fn release(&mut self, block: NonNull<u8>) {
        // SAFETY: the caller's pointer sits just past the length prefix the
        // pool wrote at hand-out time.
        let base = unsafe { block.as_ptr().sub(LEN_PREFIX) };
        let len = unsafe { base.cast::<u16>().read() };
        let class = self.scheme.bucket(len.min(self.max_len), self.align);
        let next = self.table[class].map_or(std::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: the block is idle again, so its leading word is free for
        // the link; blocks are always at least one word long.
        unsafe { base.cast::<*mut u8>().write(next) };
        self.table[class] = NonNull::new(base);
    }

    unsafe fn release_after_destroy(residual: &VarResidual, block: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { residual.release(block) };
    }
}

impl Drop for VarPool {
    fn drop(&mut self) {
        let (scheme, align) = (self.scheme, self.align);
        let observer = self.observer.clone();
        for (class, head) in self.table.iter_mut().enumerate() {
            let Some(layout) = var_class_layout(scheme, align, class) else {
                continue;
            };
            let mut node = head.take();
            while let Some(block) = node {
                // SAFETY: walking links the pool wrote itself; every block in
                // bucket `class` was host-allocated with that bucket's layout.
                unsafe {
                    node = NonNull::new(block.as_ptr().cast::<*mut u8>().read());
                    host_release(block, layout, observer.as_ref());
                }
            }
        }
    }
}
