//! Value-slice descriptors.
//!
//! A [`Slice`] is a lightweight, `Copy`able handle to a value's storage:
//! which block it lives in, at what offset, how long the allocated
//! extent is, and the generation stamped on it at allocation time. The
//! generation is what lets a verb tell "this is still the same logical
//! allocation I attached to" apart from "this slot was freed and handed
//! to someone else" — the same pairing the bump allocator's checkpoint
//! restore uses to reject a stale checkpoint.

use crate::block::BlockId;

/// A handle to a value's off-heap storage.
///
/// Cheap to copy and pass around; carries no lock state itself (that
/// lives in the [`crate::header::ValueHeader`] at the front of the
/// allocated range).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    block: BlockId,
    offset: usize,
    length: usize,
    generation: u32,
    read_only: bool,
    is_value: bool,
}

impl Slice {
    /// Builds a descriptor for an allocation that just landed at
    /// `(block, offset)` with the allocator-assigned `generation`.
    ///
    /// `is_value` mirrors the flag passed to [`crate::allocator::BlockAllocator::allocate`]:
    /// `true` means this slice carries a [`crate::header::ValueHeader`] prefix
    /// and `generation` is meaningful; `false` (e.g. an immutable key
    /// allocated via `SeqExpand`) means there is no header and `generation`
    /// is the "not associated" sentinel `0`.
    pub fn associate_allocation(
        block: BlockId,
        offset: usize,
        length: usize,
        generation: u32,
        is_value: bool,
    ) -> Self {
        Self { block, offset, length, generation, read_only: false, is_value }
    }

    /// Whether this slice carries a [`crate::header::ValueHeader`] prefix.
    #[inline]
    pub fn is_value(&self) -> bool {
        self.is_value
    }

    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn allocated_length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns a copy of this descriptor marked read-only, e.g. for
    /// handing to a caller who should only ever `read`/`transform`, never
    /// `put`/`compute`/`delete`.
    #[inline]
    pub fn read_only(&self) -> Self {
        Self { read_only: true, ..*self }
    }

    /// Returns an identical, independently owned copy of this
    /// descriptor. `Slice` is already `Copy`; this exists to name the
    /// operation spec-side call sites expect (handing a duplicate to a
    /// second thread context without aliasing mutable state, since there
    /// is none here to alias).
    #[inline]
    pub fn duplicate(&self) -> Self {
        *self
    }
}
