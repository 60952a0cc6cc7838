//! Size-classed pool with bounded per-bucket idle counts and tracked
//! oversize blocks.
//!
//! Small requests work like [`VarPool`](crate::pool::VarPool), except each
//! bucket counts its idle blocks and a free that would push the count past
//! the recycle threshold releases the block to the host instead.
//!
//! Requests longer than the pool's maximum are forwarded to the host in one
//! allocation carrying a doubly-linked record, the length prefix, and the
//! payload. The pool keeps every outstanding record on a list so dropping the
//! pool releases oversize blocks the caller never freed; this is the one
//! class of caller-held blocks a pool reclaims by itself.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{host_alloc, host_release, var_class_layout, Pool, VarResidual, LEN_PREFIX};
use crate::size_class::BucketScheme;

/// Header ahead of every oversize allocation.
#[repr(C)]
struct BigBlock {
    /// Start of the caller-visible payload, just past the length prefix.
    data: *mut u8,
    prev: *mut BigBlock,
    next: *mut BigBlock,
}

const BIG_HEADER: usize = std::mem::size_of::<BigBlock>();

struct Bucket {
    first_free: Option<NonNull<u8>>,
    idle: u16,
}

/// Variable-length pool with per-bucket recycling and oversize tracking.
pub struct RecyclingVarPool {
    max_len: u16,
    align: usize,
    scheme: BucketScheme,
    threshold: u16,
    table: Box<[Bucket]>,
    first_big: Option<NonNull<BigBlock>>,
    observer: Option<AllocObserver>,
}

impl RecyclingVarPool {
    /// Creates a pool serving lengths `1..=max_len` from buckets that retain
    /// at most `threshold` idle blocks each; longer requests go to the host
    /// and are tracked.
    pub fn new(max_len: u16, align: usize, scheme: BucketScheme, threshold: u16) -> Result<Self> {
        if !align.is_power_of_two() || align < 2 {
            return Err(Error::InvalidAlign(align));
        }
        let classes = scheme.bucket(max_len.max(1), align) + 1;
        let table = (0..classes)
            .map(|_| Bucket {
                first_free: None,
                idle: 0,
            })
            .collect();
        Ok(Self {
            max_len,
            align,
            scheme,
            threshold,
            table,
            first_big: None,
            observer: None,
        })
    }

    /// Attaches a host-allocation observer.
    #[must_use]
    pub fn with_observer(mut self, observer: AllocObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Largest length served from the buckets.
    #[must_use]
    pub fn max_len(&self) -> u16 {
        self.max_len
    }

    /// Per-bucket idle bound.
    #[must_use]
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Idle blocks currently filed in the bucket serving `len`.
    #[must_use]
    pub fn idle_count(&self, len: u16) -> u16 {
        let class = self.scheme.bucket(len.min(self.max_len).max(1), self.align);
        self.table[class].idle
    }

    /// Outstanding oversize allocations.
    #[must_use]
    pub fn big_block_count(&self) -> usize {
        let mut count = 0;
        let mut node = self.first_big;
        while let Some(header) = node {
            // SAFETY: the list only holds headers the pool wrote itself.
            node = NonNull::new(unsafe { (*header.as_ptr()).next });
            count += 1;
        }
        count
    }

    /// Takes a block writable for at least `len` bytes.
    ///
    /// Lengths within the maximum are served from their bucket or the host;
    /// longer ones are host-allocated and tracked. Returns `None` only when
    /// the host allocator refuses.
    ///
    /// # Panics
    ///
    /// Panics when `len` is zero.
    pub fn alloc(&mut self, len: u16) -> Option<NonNull<u8>> {
        assert!(len != 0, "variable pools cannot serve zero-length requests");
        if len > self.max_len {
            return self.alloc_big(len);
        }
        let class = self.scheme.bucket(len, self.align);
        let bucket = &mut self.table[class];
        let base = match bucket.first_free {
            Some(block) => {
                // SAFETY: the leading word of a listed block is its link.
                let next = unsafe { block.as_ptr().cast::<*mut u8>().read() };
                bucket.first_free = NonNull::new(next);
                bucket.idle -= 1;
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

    fn alloc_big(&mut self, len: u16) -> Option<NonNull<u8>> {
        let base = host_alloc(Self::big_layout(len), self.observer.as_ref())?;
        let header = base.as_ptr().cast::<BigBlock>();
        let old_head = self.first_big.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: the allocation is header + prefix + payload; the prefix
        // slot sits at a word-aligned offset right after the header.
        unsafe {
            let prefix = base.as_ptr().add(BIG_HEADER);
            prefix.cast::<u16>().write(len);
            let data = prefix.add(LEN_PREFIX);
            header.write(BigBlock {
                data,
                prev: std::ptr::null_mut(),
                next: old_head,
            });
            if let Some(old) = NonNull::new(old_head) {
                (*old.as_ptr()).prev = header;
            }
            self.first_big = Some(NonNull::new_unchecked(header));
            Some(NonNull::new_unchecked(data))
        }
    }

    fn big_layout(len: u16) -> Layout {
        // Fits comfortably: header + prefix + at most u16::MAX payload bytes.
        Layout::from_size_align(
            BIG_HEADER + LEN_PREFIX + usize::from(len),
            std::mem::align_of::<BigBlock>(),
        )
        .expect("oversize layout is bounded by u16::MAX")
    }

    /// Unlinks and releases an oversize block; `prefix` points at its length
    /// prefix.
    unsafe fn release_big(&mut self, prefix: *mut u8, len: u16) {
        // SAFETY: oversize allocations place the header immediately ahead of
        // the prefix; neighbours are patched so the list stays consistent.
        unsafe {
            let header = prefix.sub(BIG_HEADER).cast::<BigBlock>();
            debug_assert_eq!((*header).data, prefix.add(LEN_PREFIX));
            let prev = (*header).prev;
            let next = (*header).next;
            match NonNull::new(prev) {
                None => self.first_big = NonNull::new(next),
                Some(prev) => (*prev.as_ptr()).next = next,
            }
            if let Some(next) = NonNull::new(next) {
                (*next.as_ptr()).prev = prev;
            }
            host_release(
                NonNull::new_unchecked(header.cast::<u8>()),
                Self::big_layout(len),
                self.observer.as_ref(),
            );
        }
    }
}

impl Pool for RecyclingVarPool {
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
        // SAFETY: the caller's pointer sits just past the length prefix.
        let base = unsafe { block.as_ptr().sub(LEN_PREFIX) };
        let len = unsafe { base.cast::<u16>().read() };
        if len > self.max_len {
            // SAFETY: the stored length marks this as an oversize block, so
            // the big-block header precedes the prefix.
            unsafe { self.release_big(base, len) };
            return;
        }
        let class = self.scheme.bucket(len, self.align);
        let bucket = &mut self.table[class];
        if bucket.idle >= self.threshold {
            let Some(layout) = var_class_layout(self.scheme, self.align, class) else {
                tracing::warn!(len, "cannot rebuild the block layout; leaking the block");
                return;
            };
            // SAFETY: the block was host-allocated with its bucket's layout.
            unsafe { host_release(NonNull::new_unchecked(base), layout, self.observer.as_ref()) };
            return;
        }
        let next = bucket.first_free.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        // SAFETY: the block is idle again, so its leading word is free for
        // the link.
        unsafe { base.cast::<*mut u8>().write(next) };
        bucket.first_free = NonNull::new(base);
        bucket.idle += 1;
    }

    unsafe fn release_after_destroy(residual: &VarResidual, block: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { residual.release(block) };
    }
}

impl Drop for RecyclingVarPool {
    fn drop(&mut self) {
        let (scheme, align) = (self.scheme, self.align);
        let observer = self.observer.clone();
        for (class, bucket) in self.table.iter_mut().enumerate() {
            let Some(layout) = var_class_layout(scheme, align, class) else {
                continue;
            };
            let mut node = bucket.first_free.take();
            while let Some(block) = node {
                // SAFETY: walking links the pool wrote itself; every block in
                // bucket `class` was host-allocated with that bucket's layout.
                unsafe {
                    node = NonNull::new(block.as_ptr().cast::<*mut u8>().read());
                    host_release(block, layout, observer.as_ref());
                }
            }
        }

        // Oversize blocks are reclaimed whether or not the caller freed them.
        let mut node = self.first_big.take();
        while let Some(header) = node {
            // SAFETY: list nodes are live oversize allocations; the stored
            // prefix rebuilds each one's layout.
            unsafe {
                node = NonNull::new((*header.as_ptr()).next);
                let len = (*header.as_ptr()).data.sub(LEN_PREFIX).cast::<u16>().read();
                host_release(
                    NonNull::new_unchecked(header.as_ptr().cast::<u8>()),
                    Self::big_layout(len),
                    self.observer.as_ref(),
                );
            }
        }
    }
}
