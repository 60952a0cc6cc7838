//! The six pool engines and the handle-slot wrapper around them.
//!
//! Every engine serves raw blocks for short buffers bounded by a configured
//! maximum length. The engines differ along three axes:
//!
//! - fixed-size blocks ([`FixedPool`], [`RecyclingFixedPool`], [`ChunkPool`])
//!   versus size-classed blocks ([`VarPool`], [`RecyclingVarPool`]);
//! - whether idle blocks can flow back to the host allocator before the pool
//!   is dropped (the recycling engines bound their idle count, the others
//!   only grow);
//! - free-list storage (an intrusive singly-linked list threaded through idle
//!   blocks) versus chunk storage (blocks carved out of larger contiguous
//!   allocations, chained by in-slot indices).
//!
//! All engines are single-threaded by design: they hold raw pointers and are
//! therefore neither `Send` nor `Sync`. Callers wanting parallelism keep one
//! pool per thread.
//!
//! Blocks are handed out as [`NonNull<u8>`] and returned through `release`,
//! which is `unsafe`: the pool cannot tell a live block from a dangling one,
//! so the caller vouches that the pointer came from this pool and will not be
//! touched again.

mod chunk;
mod fixed_list;
mod fixed_recycle;
mod var_list;
mod var_recycle;


pub use chunk::ChunkPool;
pub use fixed_list::FixedPool;
pub use fixed_recycle::RecyclingFixedPool;
pub use var_list::VarPool;
pub use var_recycle::RecyclingVarPool;

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::size_class::BucketScheme;

/// Byte width of the length prefix ahead of every variable-length block.
pub(crate) const LEN_PREFIX: usize = std::mem::size_of::<u16>();

/// Alignment of every host allocation a pool makes.
pub(crate) const HOST_ALIGN: usize = std::mem::align_of::<usize>();

/// Requests `layout` from the host allocator, recording the hit on the
/// observer. Returns `None` (after logging an error) when the host refuses.
pub(crate) fn host_alloc(layout: Layout, observer: Option<&AllocObserver>) -> Option<NonNull<u8>> {
    debug_assert!(layout.size() > 0);
    // SAFETY: `alloc` requires a non-zero-sized layout.
    // - Condition 1: every caller clamps sizes to at least one machine word
    //   or one index slot before building the layout.
    // - Condition 2: `Layout` construction already validated size and align.
    // Reason: pools hand out raw blocks whose lifetime outlives any borrow.
    let raw = unsafe { alloc(layout) };
    match NonNull::new(raw) {
        Some(block) => {
            if let Some(observer) = observer {
                observer.record_alloc();
            }
            tracing::trace!(bytes = layout.size(), "host alloc");
            Some(block)
        }
        None => {
            tracing::error!(
                bytes = layout.size(),
                "failed to malloc memory from the host allocator"
            );
            None
        }
    }
}

/// Returns `block` to the host allocator, recording the hit on the observer.
///
/// # Safety
///
/// `block` must have been produced by [`host_alloc`] with this exact `layout`
/// and must not be used afterwards.
pub(crate) unsafe fn host_release(
    block: NonNull<u8>,
    layout: Layout,
    observer: Option<&AllocObserver>,
) {
    // SAFETY: `dealloc` requires the original pointer/layout pair; the
    // caller contract guarantees both.
    unsafe { dealloc(block.as_ptr(), layout) };
    if let Some(observer) = observer {
        observer.record_free();
    }
    tracing::trace!(bytes = layout.size(), "host free");
}

/// Host layout of a block filed in bucket `class` of a variable-length pool.
///
/// The allocation holds the two-byte length prefix followed by the bucket's
/// shared capacity, clamped up to the size of an intrusive free-list node.
pub(crate) fn var_class_layout(
    scheme: BucketScheme,
    align: usize,
    class: usize,
) -> Option<Layout> {
    let bytes = (LEN_PREFIX + scheme.capacity(class, align)).max(std::mem::size_of::<usize>());
    Layout::from_size_align(bytes, HOST_ALIGN).ok()
}

/// Behavior shared by every pool engine: giving blocks back, and routing a
/// late free once the pool itself is gone.
///
/// `alloc` is deliberately not part of the trait; the fixed engines take no
/// size argument while the variable engines do.
pub trait Pool {
    /// What a destroyed [`PoolSlot`] keeps so it can still route late frees.
    type Residual: Clone;

    /// Captures the data a destroyed slot needs.
    fn residual(&self) -> Self::Residual;

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by this pool's `alloc` and must not be
    /// read, written, or released again after this call.
    unsafe fn release(&mut self, block: NonNull<u8>);

    /// Routes a block freed after the pool was destroyed.
    ///
    /// # Safety
    ///
    /// Same contract as [`Pool::release`], against the pool the residual was
    /// captured from.
    unsafe fn release_after_destroy(residual: &Self::Residual, block: NonNull<u8>);
}

/// Residual of the fixed-size list engines: enough to hand a late block
/// straight back to the host.
#[derive(Debug, Clone)]
pub struct FixedResidual {
    pub(crate) layout: Layout,
    pub(crate) observer: Option<AllocObserver>,
}

impl FixedResidual {
    pub(crate) unsafe fn release(&self, block: NonNull<u8>) {
        // SAFETY: every block of a fixed list pool was host-allocated with
        // the pool's single layout; the caller vouches for the pointer.
        unsafe { host_release(block, self.layout, self.observer.as_ref()) };
    }
}

/// Residual of the variable-length engines.
#[derive(Debug, Clone)]
pub struct VarResidual {
    pub(crate) max_len: u16,
    pub(crate) align: usize,
    pub(crate) scheme: BucketScheme,
    pub(crate) observer: Option<AllocObserver>,
}

impl VarResidual {
    pub(crate) unsafe fn release(&self, block: NonNull<u8>) {
        // SAFETY: the block carries its length prefix just ahead of the
        // caller's pointer; the caller vouches the block is live.
        let base = unsafe { block.as_ptr().sub(LEN_PREFIX) };
        let len = unsafe { base.cast::<u16>().read() };
        if len > self.max_len {
            tracing::warn!(len, "oversize block was already reclaimed when the pool was destroyed");
            return;
        }
        let class = self.scheme.bucket(len, self.align);
        let Some(layout) = var_class_layout(self.scheme, self.align, class) else {
            tracing::warn!(len, "cannot rebuild the block layout; leaking the block");
            return;
        };
        // SAFETY: `base` is the start of the original host allocation and
        // `layout` is rebuilt by the same formula the pool allocated with.
        unsafe {
            host_release(NonNull::new_unchecked(base), layout, self.observer.as_ref());
        }
    }
}

/// Residual of the chunk engines. Blocks live inside chunks the pool released
/// wholesale at destroy time, so a late free has nothing left to give back.
#[derive(Debug, Clone)]
pub struct ChunkResidual;

/// A caller-owned slot holding a pool handle.
///
/// The slot models the lifecycle contract around destruction: `destroy`
/// replaces the live pool with a destroyed marker, and a `free` against the
/// marker releases the block straight to the host with a warning instead of
/// touching pool state. The marker keeps the pool's [`Pool::Residual`] so the
/// late release can still reconstruct the block's host layout.
pub struct PoolSlot<P: Pool> {
    state: SlotState<P>,
}

enum SlotState<P: Pool> {
    Live(P),
    Destroyed(P::Residual),
}

impl<P: Pool> PoolSlot<P> {
    /// Wraps a live pool.
    pub fn new(pool: P) -> Self {
        Self {
            state: SlotState::Live(pool),
        }
    }

    /// The live pool, or `None` once destroyed.
    pub fn get_mut(&mut self) -> Option<&mut P> {
        match &mut self.state {
            SlotState::Live(pool) => Some(pool),
            SlotState::Destroyed(_) => None,
        }
    }

    /// Whether the slot holds the destroyed marker.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(self.state, SlotState::Destroyed(_))
    }

    /// Destroys the pool, releasing everything it still owns. Idempotent.
    pub fn destroy(&mut self) {
        if let SlotState::Live(pool) = &self.state {
            let residual = pool.residual();
            self.state = SlotState::Destroyed(residual);
        }
    }

    /// Frees a block through the slot.
    ///
    /// On a live pool this is [`Pool::release`]. On a destroyed slot the
    /// block goes straight back to the host with a warning; the variable
    /// engines recover the layout from the length prefix, while chunk blocks
    /// were already reclaimed with their chunks and are left alone.
    ///
    /// # Safety
    ///
    /// Same contract as [`Pool::release`]. After `destroy`, only blocks whose
    /// backing memory the pool did not reclaim may still be freed here.
    pub unsafe fn free(&mut self, block: NonNull<u8>) {
        match &mut self.state {
            SlotState::Live(pool) => {
                // SAFETY: forwarded caller contract.
                unsafe { pool.release(block) };
            }
            SlotState::Destroyed(residual) => {
                tracing::warn!("a block is being freed but its memory pool was already destroyed");
                // SAFETY: forwarded caller contract.
                unsafe { P::release_after_destroy(residual, block) };
            }
        }
    }
}
