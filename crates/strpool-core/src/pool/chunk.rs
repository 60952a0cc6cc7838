//! Fixed-size blocks carved out of contiguous chunks.
//!
//! A chunk is one host allocation holding `blocks * block_size` payload
//! bytes. Idle slots chain through two-byte indices written into each slot's
//! leading bytes; the chain's end sentinel equals the chunk's block count.
//! Indices survive inside payload space, so a chunk needs no side table and
//! destroying the pool releases every block wholesale, whether or not the
//! caller freed them individually.
//!
//! Growth is optional: with a zero grow size the pool serves only the first
//! chunk and reports exhaustion once it is empty.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::counters::AllocObserver;
use crate::error::{Error, Result};
use crate::pool::{host_alloc, host_release, ChunkResidual, Pool, HOST_ALIGN};

/// In-slot index type; its size is the minimum block size.
type SlotIndex = u16;

const INDEX_SIZE: usize = std::mem::size_of::<SlotIndex>();

/// Fixed-size pool backed by a list of growable chunks.
pub struct ChunkPool {
    block_size: usize,
    first_blocks: u16,
    grow_blocks: u16,
    first_layout: Layout,
    grow_layout: Option<Layout>,
    chunks: Vec<Chunk>,
    observer: Option<AllocObserver>,
}

struct Chunk {
    blocks: u16,
    available: u16,
    first_free: SlotIndex,
    payload: NonNull<u8>,
    layout: Layout,
}

impl Chunk {
    /// Allocates a chunk and threads its idle chain `0 -> 1 -> ... -> blocks`.
    fn new(
        blocks: u16,
        block_size: usize,
        layout: Layout,
        observer: Option<&AllocObserver>,
    ) -> Option<Self> {
        let payload = host_alloc(layout, observer)?;
        let mut slot = payload.as_ptr();
        for i in 0..blocks {
            // SAFETY: slot `i` starts at `i * block_size`, inside the payload
            // allocation; indices are written unaligned because `block_size`
            // need not be a multiple of the index size.
            unsafe {
                slot.cast::<SlotIndex>().write_unaligned(i + 1);
                slot = slot.add(block_size);
            }
        }
        Some(Self {
            blocks,
            available: blocks,
            first_free: 0,
            payload,
            layout,
        })
    }

    fn contains(&self, block: NonNull<u8>, block_size: usize) -> bool {
        let start = self.payload.as_ptr() as usize;
        let end = start + usize::from(self.blocks) * block_size;
        (start..end).contains(&(block.as_ptr() as usize))
    }

    /// Unlinks and returns the chunk's first idle slot.
    fn take_first(&mut self, block_size: usize) -> NonNull<u8> {
        debug_assert!(self.available > 0);
        let offset = usize::from(self.first_free) * block_size;
        // SAFETY: `first_free < blocks` whenever `available > 0`, so the
        // offset is in bounds; the slot's leading bytes hold the next index.
        unsafe {
            let slot = self.payload.as_ptr().add(offset);
            self.first_free = slot.cast::<SlotIndex>().read_unaligned();
            self.available -= 1;
            NonNull::new_unchecked(slot)
        }
    }

    /// Relinks a block of this chunk at the head of the idle chain.
    fn put_back(&mut self, block: NonNull<u8>, block_size: usize) {
        let offset = block.as_ptr() as usize - self.payload.as_ptr() as usize;
        #[allow(clippy::cast_possible_truncation)]
        // offset / block_size < blocks <= u16::MAX, checked by `contains`.
        let index = (offset / block_size) as SlotIndex;
        // SAFETY: the caller verified containment; the block is idle again so
        // its leading bytes are free for the chain index.
        unsafe { block.as_ptr().cast::<SlotIndex>().write_unaligned(self.first_free) };
        self.first_free = index;
        self.available += 1;
    }
}

impl ChunkPool {
    /// Creates a pool serving `block_size`-byte blocks from chunks of
    /// `first_blocks` blocks, growing by `grow_blocks`-block chunks when
    /// every chunk is full (`0` forbids growth).
    ///
    /// The block size is clamped up to the index size. Fails when the first
    /// chunk is empty or a chunk's byte size overflows.
    pub fn new(block_size: usize, first_blocks: u16, grow_blocks: u16) -> Result<Self> {
        if first_blocks == 0 {
            return Err(Error::ZeroBlocks);
        }
        let block_size = block_size.max(INDEX_SIZE);
        let first_layout = Self::chunk_layout(block_size, first_blocks)?;
        let grow_layout = if grow_blocks == 0 {
            None
        } else {
            Some(Self::chunk_layout(block_size, grow_blocks)?)
        };
        Ok(Self {
            block_size,
            first_blocks,
            grow_blocks,
            first_layout,
            grow_layout,
            chunks: Vec::new(),
            observer: None,
        })
    }

    fn chunk_layout(block_size: usize, blocks: u16) -> Result<Layout> {
        let bytes = usize::from(blocks)
            .checked_mul(block_size)
            .ok_or(Error::LayoutOverflow)?;
        Layout::from_size_align(bytes, HOST_ALIGN).map_err(|_| Error::LayoutOverflow)
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
        self.block_size
    }

    /// Number of chunks currently owned by the pool.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total block capacity across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(|c| usize::from(c.blocks)).sum()
    }

    /// Idle blocks across all chunks.
    #[must_use]
    pub fn idle_blocks(&self) -> usize {
        self.chunks.iter().map(|c| usize::from(c.available)).sum()
    }

    /// Whether `block` lies inside one of the pool's chunks.
    #[must_use]
    pub fn contains(&self, block: NonNull<u8>) -> bool {
        self.chunks
            .iter()
            .any(|c| c.contains(block, self.block_size))
    }

    /// Takes a block from the first chunk that still has one, building the
    /// first chunk or growing by one chunk as needed.
    ///
    /// Returns `None` when the host allocator refuses a chunk, or when every
    /// chunk is full and growth is forbidden (logged as a warning).
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        if self.chunks.is_empty() {
            let chunk = Chunk::new(
                self.first_blocks,
                self.block_size,
                self.first_layout,
                self.observer.as_ref(),
            )?;
            self.chunks.push(chunk);
        }

        // Fresh chunks land at the tail, so scanning backwards serves the
        // most recently grown chunk first.
        let block_size = self.block_size;
        if let Some(chunk) = self.chunks.iter_mut().rev().find(|c| c.available > 0) {
            return Some(chunk.take_first(block_size));
        }

        let Some(grow_layout) = self.grow_layout else {
            tracing::warn!("no blocks left in the pool and growth is disabled");
            return None;
        };
        let mut chunk = Chunk::new(
            self.grow_blocks,
            self.block_size,
            grow_layout,
            self.observer.as_ref(),
        )?;
        let block = chunk.take_first(block_size);
        self.chunks.push(chunk);
        Some(block)
    }
}

impl Pool for ChunkPool {
    type Residual = ChunkResidual;

    fn residual(&self) -> ChunkResidual {
        ChunkResidual
    }

    /// Returns a block to the chunk whose payload range contains it.
    ///
    /// A pointer no chunk contains is logged and ignored; the pool never
    /// forwards a pointer it does not recognize to the host allocator.
    unsafe fn release(&mut self, block: NonNull<u8>) {
        let block_size = self.block_size;
        let Some(chunk) = self
            .chunks
            .iter_mut()
            .rev()
            .find(|c| c.contains(block, block_size))
        else {
            tracing::warn!("freed block does not belong to any chunk of this pool");
            return;
        };
        chunk.put_back(block, block_size);
    }

    unsafe fn release_after_destroy(_residual: &ChunkResidual, _block: NonNull<u8>) {
        tracing::warn!("chunk pool blocks are reclaimed with their chunks; ignoring the late free");
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        for chunk in &self.chunks {
            // SAFETY: each payload was host-allocated with the layout stored
            // beside it and is not referenced past this point.
            unsafe { host_release(chunk.payload, chunk.layout, self.observer.as_ref()) };
        }
    }
}
