//! Bump-plus-free-list allocator flavor: reclaims freed slots through
//! power-of-two size classes, bumping the slot's generation on every
//! handout so a stale [`Slice`] is detected rather than silently
//! aliasing a new occupant.
//!
//! Grounded on the teacher's `PoolAllocator`: an intrusive, CAS-linked
//! free list per size class, generalized from one fixed block size to a
//! bounded set of power-of-two payload classes.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use super::{bump_in_pool, init_header, resolve_header, resolve_payload, BlockAllocator};
use crate::block::{BlockId, BlockPool};
use crate::error::{SliceError, SliceResult};
use crate::header::{ValueHeader, HEADER_ALIGN, HEADER_SIZE};
use crate::slice::Slice;
use crate::utils::Backoff;

/// Smallest payload a size class covers; must be large enough to host a
/// [`FreeNode`] once a slot of this size is freed.
const MIN_CLASS_PAYLOAD: usize = 32;
/// Number of size classes; the largest covers
/// `MIN_CLASS_PAYLOAD << (MAX_SIZE_CLASSES - 1)` bytes.
const MAX_SIZE_CLASSES: usize = 20;

/// Intrusive free-list node written into a freed slot's own payload
/// bytes once its header has gone `DELETED`.
#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
    block: u32,
    offset: usize,
}

fn size_class_of(payload_size: usize) -> Option<usize> {
    let rounded = payload_size.max(MIN_CLASS_PAYLOAD).next_power_of_two();
    let idx = rounded.trailing_zeros() as usize - MIN_CLASS_PAYLOAD.trailing_zeros() as usize;
    (idx < MAX_SIZE_CLASSES).then_some(idx)
}

fn class_payload_size(idx: usize) -> usize {
    MIN_CLASS_PAYLOAD << idx
}

/// Allocates by bumping within owned blocks, but threads freed slots
/// back onto a per-size-class free list instead of leaking them.
pub struct SyncRecycle {
    pool: BlockPool,
    free_heads: Vec<AtomicPtr<FreeNode>>,
    generation: AtomicU32,
    allocated: AtomicUsize,
}

impl SyncRecycle {
    /// Creates an allocator that grows `block_size`-byte blocks aligned
    /// to `block_align`, recycling freed slots through size-classed free
    /// lists.
    pub fn new(block_size: usize, block_align: usize) -> Self {
        let mut free_heads = Vec::with_capacity(MAX_SIZE_CLASSES);
        free_heads.resize_with(MAX_SIZE_CLASSES, || AtomicPtr::new(core::ptr::null_mut()));
        Self {
            pool: BlockPool::new(block_size, block_align.max(HEADER_ALIGN)),
            free_heads,
            generation: AtomicU32::new(1),
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    fn try_pop(&self, class: usize) -> Option<(BlockId, usize)> {
        let head = &self.free_heads[class];
        let mut backoff = Backoff::new();
        loop {
            let top = head.load(Ordering::Acquire);
            if top.is_null() {
                return None;
            }
            // SAFETY: nodes on this list were written by `push_free` and
            // never freed elsewhere; the list only ever shrinks via this
            // CAS, so `top` is still valid until it's unlinked.
            let node = unsafe { &*top };
            let next = node.next;
            if head.compare_exchange_weak(top, next, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                return Some((BlockId::from_raw(node.block), node.offset));
            }
            backoff.spin();
        }
    }

    fn push_free(&self, class: usize, node_ptr: NonNull<FreeNode>) {
        let head = &self.free_heads[class];
        let mut backoff = Backoff::new();
        loop {
            let top = head.load(Ordering::Acquire);
            // SAFETY: `node_ptr` points at payload bytes of a slot this
            // allocator exclusively owns right now (its header is
            // already DELETED and no guard holds a lock on it).
            unsafe { (*node_ptr.as_ptr()).next = top };
            if head
                .compare_exchange_weak(top, node_ptr.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }
}

impl BlockAllocator for SyncRecycle {
    fn allocate(&self, payload_size: usize, is_value: bool) -> SliceResult<Slice> {
        if !is_value {
            // Key-like allocations are bump-only even through this
            // allocator: there is no header to mark DELETED, so nothing
            // could gate a safe reuse of the slot.
            let (block_id, offset) = bump_in_pool(&self.pool, payload_size)?;
            self.allocated.fetch_add(payload_size, Ordering::Relaxed);
            return Ok(Slice::associate_allocation(block_id, offset, payload_size, 0, false));
        }

        let class = size_class_of(payload_size)
            .ok_or(SliceError::OutOfMemory { requested: payload_size })?;
        let class_len = class_payload_size(class);
        let total_len = HEADER_SIZE + class_len;

        if let Some((block_id, offset)) = self.try_pop(class) {
            let header_ptr: NonNull<ValueHeader> = {
                let block = self.pool.find(block_id).expect("recycled slot's block still owned");
                block.byte_ptr(offset).cast()
            };
            // Open question resolution: a slot only reaches the free
            // list once its header is observably DELETED, which only
            // `delete` produces, and only while holding the write lock —
            // so nothing can still be reading or writing through it here.
            debug_assert!(
                unsafe { header_ptr.as_ref() }.is_deleted(),
                "recycled slot must have been logically deleted before reuse"
            );
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            // SAFETY: the slot was just unlinked from the free list under
            // exclusive ownership of this call.
            unsafe { init_header(header_ptr, generation) };
            self.allocated.fetch_add(total_len, Ordering::Relaxed);
            #[cfg(feature = "logging")]
            tracing::trace!(block = block_id.get(), offset, generation, class, "recycled a freed slot");
            return Ok(Slice::associate_allocation(block_id, offset, total_len, generation, true));
        }

        let (block_id, offset) = bump_in_pool(&self.pool, total_len)?;
        let header_ptr: NonNull<ValueHeader> = {
            let block = self.pool.find(block_id).expect("just bumped into this block");
            block.byte_ptr(offset).cast()
        };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        // SAFETY: `offset` was just reserved and is not shared with any
        // other in-flight allocation.
        unsafe { init_header(header_ptr, generation) };
        self.allocated.fetch_add(total_len, Ordering::Relaxed);
        Ok(Slice::associate_allocation(block_id, offset, total_len, generation, true))
    }

    fn free(&self, slice: Slice) {
        if !slice.is_value() {
            // Key-like allocations are never reclaimed by this allocator.
            return;
        }
        let payload_len = slice.allocated_length() - HEADER_SIZE;
        let class = size_class_of(payload_len).expect("freed slice must match a known size class");

        let header_ptr = resolve_header(&self.pool, &slice);
        debug_assert!(
            unsafe { header_ptr.as_ref() }.is_deleted(),
            "free() called on a slot that was never logically deleted"
        );

        let payload_ptr = resolve_payload(&self.pool, &slice);
        let node_ptr: NonNull<FreeNode> = payload_ptr.cast();
        // SAFETY: payload bytes of a deleted, unlocked slot are exclusively
        // ours to overwrite with free-list bookkeeping.
        unsafe {
            core::ptr::write(
                node_ptr.as_ptr(),
                FreeNode { next: core::ptr::null_mut(), block: slice.block().get(), offset: slice.offset() },
            );
        }
        self.push_free(class, node_ptr);
        #[cfg(feature = "logging")]
        tracing::trace!(block = slice.block().get(), offset = slice.offset(), class, "freed slot returned to size class");
    }

    fn header(&self, slice: &Slice) -> &ValueHeader {
        // SAFETY: the pointer was derived from a block this pool still
        // owns.
        unsafe { resolve_header(&self.pool, slice).as_ref() }
    }

    fn payload(&self, slice: &Slice) -> NonNull<u8> {
        resolve_payload(&self.pool, slice)
    }

    fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
