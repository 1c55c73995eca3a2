//! Off-heap blocks and the pool that owns them.
//!
//! A [`Block`] is a single fixed-capacity, page-ish region of raw memory
//! handed out byte-range by byte-range via an atomic bump cursor. A
//! [`BlockPool`] owns a growable list of blocks and assigns each one a
//! [`BlockId`] that is never reused for the pool's lifetime, so a
//! `(BlockId, offset)` pair stays a stable, comparable identity for as
//! long as anything holds a [`crate::slice::Slice`] pointing at it.

use core::alloc::Layout;
use core::num::NonZeroU32;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{SliceError, SliceResult};
use crate::utils::align_up;

/// Identity of a block within a [`BlockPool`].
///
/// Assigned by a process-wide atomic counter and never recycled: a
/// retired block's id stays retired, which is what lets `(BlockId,
/// offset)` serve as a stable identity independent of whether the slot
/// itself has since been reused by `SyncRecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(NonZeroU32);

impl BlockId {
    #[inline]
    fn from_counter(raw: u32) -> Self {
        // The counter starts at 1 and only increments, so this is never zero.
        BlockId(NonZeroU32::new(raw).expect("block id counter overflowed to zero"))
    }

    /// Raw numeric value, useful for logging.
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Reconstructs a `BlockId` from a value previously obtained from
    /// [`BlockId::get`]. Used to recover a free-list node's block
    /// identity without round-tripping through the counter again.
    #[inline]
    pub(crate) fn from_raw(raw: u32) -> Self {
        BlockId(NonZeroU32::new(raw).expect("free-list node carried a zero block id"))
    }
}

static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(1);

fn next_block_id() -> BlockId {
    let raw = NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed);
    BlockId::from_counter(raw)
}

/// A single off-heap region handed out byte-range by byte-range via an
/// atomic bump cursor.
///
/// Bump-only at this layer: `Block` never reclaims a range itself. Reuse
/// is the allocator layer's job (see [`crate::allocator::sync_recycle`]),
/// which tracks freed ranges in its own free lists and hands them back
/// out through the same `Block` storage.
pub struct Block {
    id: BlockId,
    ptr: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    cursor: AtomicUsize,
}

// SAFETY: `Block` owns its allocation exclusively; all access to the
// bytes behind `ptr` is mediated by offsets handed out through `bump`,
// which are disjoint by construction, so concurrent `&Block` access
// from multiple threads never produces overlapping writes.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// Allocates a new block of `capacity` bytes aligned to `align`.
    pub fn new(capacity: usize, align: usize) -> SliceResult<Self> {
        let layout = Layout::from_size_align(capacity, align)
            .map_err(|_| SliceError::OutOfMemory { requested: capacity })?;
        let ptr = if capacity == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: `layout` has non-zero size, checked above.
            let raw = unsafe { std::alloc::alloc(layout) };
            NonNull::new(raw).ok_or(SliceError::OutOfMemory { requested: capacity })?
        };
        Ok(Self {
            id: next_block_id(),
            ptr,
            layout,
            capacity,
            cursor: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.capacity)
    }

    /// Bump-allocates `size` bytes aligned to `align`, returning the
    /// offset of the reserved range, or `None` if the block has no room
    /// left.
    pub fn bump(&self, size: usize, align: usize) -> Option<usize> {
        let mut current = self.cursor.load(Ordering::Relaxed);
        loop {
            let start = align_up(current, align);
            let end = start.checked_add(size)?;
            if end > self.capacity {
                return None;
            }
            match self.cursor.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(start),
                Err(observed) => current = observed,
            }
        }
    }

    /// Raw pointer to the byte at `offset` within this block. Caller must
    /// ensure `offset` lies within a range this block actually handed out.
    #[inline]
    pub fn byte_ptr(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: callers only pass offsets previously returned by `bump`,
        // which are always within `capacity`.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            // SAFETY: `ptr`/`layout` are exactly what we allocated with.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

/// Owns a growable set of [`Block`]s and assigns their identities.
///
/// Growth (adding a new block) takes `growth_lock`; the hot path
/// (bumping within an already-owned block) never touches it.
pub struct BlockPool {
    block_size: usize,
    block_align: usize,
    blocks: parking_lot::RwLock<Vec<Block>>,
}

impl BlockPool {
    /// Creates an empty pool that allocates `block_size`-byte blocks
    /// aligned to `block_align` as needed.
    pub fn new(block_size: usize, block_align: usize) -> Self {
        Self {
            block_size,
            block_align,
            blocks: parking_lot::RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently owned by the pool.
    pub fn allocated_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Sum of all owned blocks' capacities.
    pub fn total_capacity(&self) -> usize {
        self.blocks.read().iter().map(Block::capacity).sum()
    }

    /// Runs `f` against each owned block until it returns `Some`, newest
    /// block first (most likely to have room).
    pub fn try_each_block<R>(&self, mut f: impl FnMut(&Block) -> Option<R>) -> Option<R> {
        let blocks = self.blocks.read();
        blocks.iter().rev().find_map(|b| f(b))
    }

    /// Looks up a block by id.
    pub fn find(&self, id: BlockId) -> Option<parking_lot::MappedRwLockReadGuard<'_, Block>> {
        parking_lot::RwLockReadGuard::try_map(self.blocks.read(), |blocks| {
            blocks.iter().find(|b| b.id() == id)
        })
        .ok()
    }

    /// Adds a new block sized for at least `min_capacity` bytes (rounded
    /// up to `block_size`), returning its id.
    pub fn grow(&self, min_capacity: usize) -> SliceResult<BlockId> {
        let capacity = min_capacity.max(self.block_size);
        let block = Block::new(capacity, self.block_align)?;
        let id = block.id();
        self.blocks.write().push(block);
        Ok(id)
    }
}
