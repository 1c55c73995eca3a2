//! The value-operation verb layer: `read`, `transform`, `put`,
//! `compute`, `delete`.
//!
//! Every verb runs the same protocol before touching payload bytes:
//! attach (generation + moved check), acquire the appropriate lock,
//! hand the caller a bounds-checked view, then release the lock via the
//! guard's `Drop` — so a panicking closure still unlocks, the same
//! scoped-release guarantee the teacher's `PoolBox` gives a pool
//! allocation.

use crate::allocator::BlockAllocator;
use crate::error::{SliceResult, VerbOutcome};
use crate::header::ValueHeader;
use crate::serializer::Serializer;
use crate::slice::Slice;
use crate::thread_context::ThreadContext;
use crate::view::{MemorySpan, MemorySpanMut};

/// Binds a [`BlockAllocator`] flavor to the verb layer.
pub struct ValueOperations<'a, A: BlockAllocator> {
    allocator: &'a A,
}

impl<'a, A: BlockAllocator> ValueOperations<'a, A> {
    pub fn new(allocator: &'a A) -> Self {
        Self { allocator }
    }

    fn attach(&self, slice: &Slice) -> Option<&ValueHeader> {
        let header = self.allocator.header(slice);
        header.attach(slice).ok().map(|()| header)
    }

    fn payload_bytes(&self, slice: &Slice) -> &[u8] {
        let ptr = self.allocator.payload(slice);
        let len = self.allocator.payload_len(slice);
        // SAFETY: the caller holds at least a read lock for the duration
        // this slice is used, guaranteed by the verb methods below.
        unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) }
    }

    fn payload_bytes_mut(&self, slice: &Slice) -> &mut [u8] {
        let ptr = self.allocator.payload(slice);
        let len = self.allocator.payload_len(slice);
        // SAFETY: the caller holds the write lock for the duration this
        // slice is used, guaranteed by the verb methods below.
        unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
    }

    /// Runs `f` against a read-only view of `slice`'s payload under the
    /// shared read lock.
    pub fn read<F, R>(&self, slice: &Slice, f: F) -> SliceResult<VerbOutcome<R>>
    where
        F: FnOnce(&MemorySpan) -> SliceResult<R>,
    {
        self.under_read_lock(slice, f)
    }

    /// Equivalent to [`read`](Self::read), but writes its result into
    /// `ctx`'s reusable scratch buffer instead of letting the caller
    /// allocate a fresh result each call. `result_len` bounds how many
    /// bytes `f` may write into the scratch buffer it's handed; `f`
    /// returns how many it actually wrote, which is what comes back as
    /// the `Ok` payload (the written bytes live in
    /// `ctx.result_buffer(result_len)` until the next call reuses it).
    pub fn transform<F>(
        &self,
        ctx: &mut ThreadContext,
        slice: &Slice,
        result_len: usize,
        f: F,
    ) -> SliceResult<VerbOutcome<usize>>
    where
        F: FnOnce(&MemorySpan, &mut [u8]) -> SliceResult<usize>,
    {
        let Some(header) = self.attach(slice) else {
            return Ok(VerbOutcome::Retry);
        };
        let guard = match header.lock_read() {
            VerbOutcome::Ok(g) => g,
            VerbOutcome::False => return Ok(VerbOutcome::False),
            VerbOutcome::Retry => return Ok(VerbOutcome::Retry),
        };
        let bytes = self.payload_bytes(slice);
        // SAFETY: `guard` holds the read lock for the view's lifetime.
        let span = unsafe { MemorySpan::new(bytes) };
        let out = ctx.result_buffer(result_len);
        let written = f(&span, out)?;
        drop(guard);
        Ok(VerbOutcome::Ok(written))
    }

    fn under_read_lock<F, R>(&self, slice: &Slice, f: F) -> SliceResult<VerbOutcome<R>>
    where
        F: FnOnce(&MemorySpan) -> SliceResult<R>,
    {
        let Some(header) = self.attach(slice) else {
            return Ok(VerbOutcome::Retry);
        };
        let guard = match header.lock_read() {
            VerbOutcome::Ok(g) => g,
            VerbOutcome::False => return Ok(VerbOutcome::False),
            VerbOutcome::Retry => return Ok(VerbOutcome::Retry),
        };
        let bytes = self.payload_bytes(slice);
        // SAFETY: `guard` holds the read lock for the view's lifetime.
        let span = unsafe { MemorySpan::new(bytes) };
        let result = f(&span)?;
        drop(guard);
        Ok(VerbOutcome::Ok(result))
    }

    /// Serializes `value` into `slice`'s payload under the write lock.
    /// If `serializer.size(value)` exceeds the payload's capacity, no
    /// bytes are written; instead the header is marked `MOVED` and this
    /// returns `VerbOutcome::Retry`, signaling the caller (the index
    /// layer, out of scope here) that `value` no longer fits this slot
    /// and must be reallocated elsewhere. This verb never allocates a
    /// replacement slice itself.
    pub fn put<T>(&self, slice: &Slice, value: &T, serializer: &dyn Serializer<T>) -> SliceResult<VerbOutcome<()>> {
        let Some(header) = self.attach(slice) else {
            return Ok(VerbOutcome::Retry);
        };
        let guard = match header.lock_write() {
            VerbOutcome::Ok(g) => g,
            VerbOutcome::False => return Ok(VerbOutcome::False),
            VerbOutcome::Retry => return Ok(VerbOutcome::Retry),
        };
        let capacity = self.allocator.payload_len(slice);
        let needed = serializer.size(value);
        if needed > capacity {
            guard.mark_moved();
            drop(guard);
            return Ok(VerbOutcome::Retry);
        }
        let bytes = self.payload_bytes_mut(slice);
        // SAFETY: `guard` holds the write lock for the view's lifetime.
        let mut span = unsafe { MemorySpanMut::new(bytes) };
        let dst = span.get_mut(0, needed)?;
        serializer.serialize(value, dst)?;
        drop(guard);
        Ok(VerbOutcome::Ok(()))
    }

    /// Runs `f` against a writable view of `slice`'s payload under the
    /// exclusive write lock, producing a caller-chosen result.
    pub fn compute<F, R>(&self, slice: &Slice, f: F) -> SliceResult<VerbOutcome<R>>
    where
        F: FnOnce(&mut MemorySpanMut) -> SliceResult<R>,
    {
        let Some(header) = self.attach(slice) else {
            return Ok(VerbOutcome::Retry);
        };
        let guard = match header.lock_write() {
            VerbOutcome::Ok(g) => g,
            VerbOutcome::False => return Ok(VerbOutcome::False),
            VerbOutcome::Retry => return Ok(VerbOutcome::Retry),
        };
        let bytes = self.payload_bytes_mut(slice);
        // SAFETY: `guard` holds the write lock for the view's lifetime.
        let mut span = unsafe { MemorySpanMut::new(bytes) };
        let result = f(&mut span)?;
        drop(guard);
        Ok(VerbOutcome::Ok(result))
    }

    /// Marks `slice` logically deleted and returns its storage to the
    /// allocator. Idempotent: deleting an already-deleted slice just
    /// observes `DELETED` under the write-lock attempt and reports
    /// `False` rather than erroring.
    pub fn delete(&self, slice: &Slice) -> SliceResult<VerbOutcome<()>> {
        let Some(header) = self.attach(slice) else {
            return Ok(VerbOutcome::Retry);
        };
        let guard = match header.lock_write() {
            VerbOutcome::Ok(g) => g,
            VerbOutcome::False => return Ok(VerbOutcome::False),
            VerbOutcome::Retry => return Ok(VerbOutcome::Retry),
        };
        guard.delete();
        drop(guard);
        self.allocator.free(*slice);
        Ok(VerbOutcome::Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SyncRecycle;

    fn int_at(bytes: &[u8], i: usize) -> i32 {
        i32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap())
    }

    /// A byte-for-byte serializer over pre-encoded payloads, standing in
    /// for the typed serializer a caller above this crate would supply.
    struct RawBytes;

    impl Serializer<Vec<u8>> for RawBytes {
        fn size(&self, value: &Vec<u8>) -> usize {
            value.len()
        }

        fn serialize(&self, value: &Vec<u8>, out: &mut [u8]) -> SliceResult<()> {
            out.copy_from_slice(value);
            Ok(())
        }

        fn deserialize(&self, bytes: &[u8]) -> SliceResult<Vec<u8>> {
            Ok(bytes.to_vec())
        }
    }

    #[test]
    fn transform_sums_three_ints() {
        let alloc = SyncRecycle::new(4096, 8);
        let ops = ValueOperations::new(&alloc);
        let slice = alloc.allocate(12, true).unwrap();
        ops.put(&slice, &vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0], &RawBytes).unwrap();

        let mut ctx = ThreadContext::new();
        let outcome = ops
            .transform(&mut ctx, &slice, 4, |view, out| {
                let bytes = view.get(0, 12)?;
                let sum = int_at(bytes, 0) + int_at(bytes, 1) + int_at(bytes, 2);
                out[..4].copy_from_slice(&sum.to_le_bytes());
                Ok(4)
            })
            .unwrap();
        let written = match outcome {
            VerbOutcome::Ok(n) => n,
            other => panic!("expected Ok, got {other:?}"),
        };
        assert_eq!(i32::from_le_bytes(ctx.result_buffer(written).try_into().unwrap()), 6);
    }

    #[test]
    fn transform_out_of_bounds_is_an_error_not_a_panic() {
        let alloc = SyncRecycle::new(4096, 8);
        let ops = ValueOperations::new(&alloc);
        let slice = alloc.allocate(4, true).unwrap();

        let mut ctx = ThreadContext::new();
        let result = ops.transform(&mut ctx, &slice, 4, |view, out| {
            let bytes = view.get(0, 100)?;
            out[..4].copy_from_slice(&bytes[..4]);
            Ok(4)
        });
        assert!(result.is_err());
    }

    #[test]
    fn put_marks_moved_and_signals_retry_when_oversized() {
        let alloc = SyncRecycle::new(4096, 8);
        let ops = ValueOperations::new(&alloc);
        let slice = alloc.allocate(4, true).unwrap();

        let oversized = vec![0u8; 4096];
        let outcome = ops.put(&slice, &oversized, &RawBytes).unwrap();
        assert!(matches!(outcome, VerbOutcome::Retry));
        assert!(alloc.header(&slice).is_moved());

        // Once MOVED, the slot is retry-only until a new allocation
        // supersedes it; a caller with the same descriptor can't proceed.
        assert!(matches!(ops.read(&slice, |v| Ok(v.len())), Ok(VerbOutcome::Retry)));
    }

    #[test]
    fn delete_is_sticky() {
        let alloc = SyncRecycle::new(4096, 8);
        let ops = ValueOperations::new(&alloc);
        let slice = alloc.allocate(4, true).unwrap();

        assert!(matches!(ops.delete(&slice), Ok(VerbOutcome::Ok(()))));
        assert!(matches!(ops.delete(&slice), Ok(VerbOutcome::False)));
        assert!(matches!(ops.read(&slice, |v| Ok(v.len())), Ok(VerbOutcome::False)));
    }

    #[test]
    fn generation_mismatch_yields_retry() {
        let alloc = SyncRecycle::new(4096, 8);
        let ops = ValueOperations::new(&alloc);
        let slice = alloc.allocate(4, true).unwrap();

        // Forge a stale descriptor pointing at the same slot but an
        // earlier generation, simulating a holder racing a delete+reuse.
        let stale = Slice::associate_allocation(
            slice.block(),
            slice.offset(),
            slice.allocated_length(),
            slice.generation().wrapping_sub(1),
            true,
        );
        assert!(matches!(ops.read(&stale, |v| Ok(v.len())), Ok(VerbOutcome::Retry)));
    }
}
