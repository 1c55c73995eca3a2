//! Block allocator flavors.
//!
//! [`BlockAllocator`] is the seam between the block/slice/header layer
//! and the verb layer: given a payload size it hands back a
//! [`Slice`] whose header is already initialized, and it resolves a
//! `Slice` back to the header/payload bytes behind it. Two flavors
//! share this trait:
//!
//! - [`seq_expand::SeqExpand`] — bump-only, grows by adding blocks,
//!   never reuses a freed offset.
//! - [`sync_recycle::SyncRecycle`] — bump plus size-classed free lists,
//!   bumping the slot's generation on every handout so a stale `Slice`
//!   is detected rather than silently aliasing a new occupant.

pub mod seq_expand;
pub mod sync_recycle;

pub use seq_expand::SeqExpand;
pub use sync_recycle::SyncRecycle;

use core::ptr::NonNull;

use crate::block::{BlockId, BlockPool};
use crate::error::SliceResult;
use crate::header::{ValueHeader, HEADER_ALIGN, HEADER_SIZE};
use crate::slice::Slice;

/// Hands out and reclaims value storage.
///
/// Not object-safe by requirement — call sites are monomorphic over
/// [`SeqExpand`] or [`SyncRecycle`], so there's no need to erase the
/// concrete type behind a trait object.
pub trait BlockAllocator: Send + Sync {
    /// Reserves room for `payload_size` bytes and returns a descriptor
    /// for it. When `is_value` is set, the allocation is prefixed with a
    /// [`ValueHeader`] (unlocked, not deleted, stamped with a fresh
    /// generation) before this returns — this is the case for mutable
    /// values routed through [`ValueOperations`](crate::ops::ValueOperations).
    /// When unset, no header is written and the returned slice carries
    /// the generation sentinel `0`, for immutable data (e.g. keys) that
    /// is only ever read by direct byte addressing.
    fn allocate(&self, payload_size: usize, is_value: bool) -> SliceResult<Slice>;

    /// Gives `slice`'s storage back to the allocator. For a value slice,
    /// the header must already be observably deleted — `delete` is the
    /// only path that produces that state, and it requires holding the
    /// write lock first, so by the time `free` runs there can be no
    /// outstanding readers or writers to race with.
    fn free(&self, slice: Slice);

    /// Borrows the header prefixing `slice`'s storage. Only valid for a
    /// slice allocated with `is_value = true`.
    fn header(&self, slice: &Slice) -> &ValueHeader;

    /// Borrows the raw payload bytes following `slice`'s header (or at
    /// `slice`'s own offset, for a header-less slice).
    fn payload(&self, slice: &Slice) -> NonNull<u8>;

    /// Cumulative bytes handed out by this allocator across all
    /// successful `allocate` calls (header bytes included for value
    /// slices), regardless of whether any of that storage has since
    /// been freed.
    fn allocated(&self) -> usize;

    /// Length in bytes of the payload region (allocated length minus the
    /// header prefix, when `slice` carries one).
    fn payload_len(&self, slice: &Slice) -> usize {
        let header_len = if slice.is_value() { HEADER_SIZE } else { 0 };
        slice.allocated_length() - header_len
    }
}

/// Resolves a `(block, offset)` pair to the header pointer at that
/// offset, via the owning pool. Shared by both allocator flavors. Only
/// meaningful for a value slice.
fn resolve_header(pool: &BlockPool, slice: &Slice) -> NonNull<ValueHeader> {
    debug_assert!(slice.is_value(), "resolve_header called on a header-less slice");
    let block = pool
        .find(slice.block())
        .expect("slice references a block this allocator never owned");
    block.byte_ptr(slice.offset()).cast()
}

fn resolve_payload(pool: &BlockPool, slice: &Slice) -> NonNull<u8> {
    let block = pool
        .find(slice.block())
        .expect("slice references a block this allocator never owned");
    let header_len = if slice.is_value() { HEADER_SIZE } else { 0 };
    block.byte_ptr(slice.offset() + header_len)
}

/// Bump-allocates header-plus-payload room within `pool`, growing it if
/// no existing block has space. Returns the block id and the offset of
/// the header's start.
fn bump_in_pool(pool: &BlockPool, total_len: usize) -> SliceResult<(BlockId, usize)> {
    if let Some((id, offset)) = pool.try_each_block(|b| {
        b.bump(total_len, HEADER_ALIGN).map(|offset| (b.id(), offset))
    }) {
        return Ok((id, offset));
    }
    let new_id = pool.grow(total_len)?;
    #[cfg(feature = "logging")]
    tracing::debug!(block = new_id.get(), requested = total_len, "grew a new block");
    let block_guard = pool.find(new_id).expect("just grew this block");
    let offset = block_guard
        .bump(total_len, HEADER_ALIGN)
        .expect("freshly grown block must fit its own minimum request");
    Ok((new_id, offset))
}

/// Initializes the header at `header_ptr` in place.
///
/// # Safety
/// `header_ptr` must point at `HEADER_SIZE` writable, `HEADER_ALIGN`-aligned
/// bytes that nothing else is concurrently accessing.
unsafe fn init_header(header_ptr: NonNull<ValueHeader>, generation: u32) {
    // SAFETY: caller guarantees exclusive access to fresh/reclaimed bytes.
    let header = unsafe { header_ptr.as_ref() };
    header.init(generation);
}
