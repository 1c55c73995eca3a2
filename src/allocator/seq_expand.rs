//! Bump-only allocator flavor: grows by adding blocks, never reuses a
//! freed offset.
//!
//! Grounded on the teacher's `BumpAllocator`: a monotonic cursor per
//! block and a process-wide generation counter, just scoped to
//! header-prefixed value slices instead of raw `Layout` requests.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{bump_in_pool, init_header, resolve_header, resolve_payload, BlockAllocator};
use crate::block::BlockPool;
use crate::error::SliceResult;
use crate::header::{ValueHeader, HEADER_SIZE};
use crate::slice::Slice;

/// Allocates by bumping a bump-cursor per block and adding blocks as
/// needed; never recycles a freed slot.
///
/// Appropriate when churn (delete-then-reallocate) is rare or when
/// memory is cheap relative to the cost of free-list bookkeeping: the
/// simplicity here is the point.
pub struct SeqExpand {
    pool: BlockPool,
    generation: AtomicU32,
    allocated: AtomicUsize,
}

impl SeqExpand {
    /// Creates an allocator that grows `block_size`-byte blocks aligned
    /// to `block_align` as bump requests outrun existing blocks.
    pub fn new(block_size: usize, block_align: usize) -> Self {
        Self {
            pool: BlockPool::new(block_size, block_align),
            generation: AtomicU32::new(1),
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }
}

impl BlockAllocator for SeqExpand {
    fn allocate(&self, payload_size: usize, is_value: bool) -> SliceResult<Slice> {
        let header_len = if is_value { HEADER_SIZE } else { 0 };
        let total_len = header_len + payload_size;
        let (block_id, offset) = bump_in_pool(&self.pool, total_len)?;
        self.allocated.fetch_add(total_len, Ordering::Relaxed);

        let generation = if is_value {
            let header_ptr: NonNull<ValueHeader> = {
                let block = self.pool.find(block_id).expect("just bumped into this block");
                block.byte_ptr(offset).cast()
            };
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            // SAFETY: `offset` was just reserved by `bump_in_pool` and is
            // not shared with any other in-flight allocation.
            unsafe { init_header(header_ptr, generation) };
            generation
        } else {
            0
        };

        #[cfg(feature = "logging")]
        tracing::trace!(block = block_id.get(), offset, generation, is_value, "bumped a new slice");
        Ok(Slice::associate_allocation(block_id, offset, total_len, generation, is_value))
    }

    fn free(&self, _slice: Slice) {
        // SeqExpand never reclaims; the block-local bytes stay allocated
        // (but logically deleted, per the header, for a value slice)
        // until the whole pool is dropped. Reclamation within a block is
        // SyncRecycle's job.
    }

    fn header(&self, slice: &Slice) -> &ValueHeader {
        // SAFETY: the pointer was derived from a block this pool still
        // owns; `ValueHeader`'s fields are atomics, safe to alias.
        unsafe { resolve_header(&self.pool, slice).as_ref() }
    }

    fn payload(&self, slice: &Slice) -> NonNull<u8> {
        resolve_payload(&self.pool, slice)
    }

    fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
