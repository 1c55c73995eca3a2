//! The per-slice lock/version header protocol.
//!
//! Every allocated slice is prefixed by a [`ValueHeader`]: an 8-byte
//! in-band record with a packed lock-state word and a generation
//! counter. The lock word multiplexes FREE / READ(k) / WRITE / DELETED /
//! MOVED into one `u32` so every transition is a single CAS, in the
//! style of the teacher's free-list head swap; the generation counter is
//! bumped whenever an allocator hands a freed slot to a new occupant,
//! which is what lets [`attach`] reject a [`crate::slice::Slice`] that
//! has gone stale out from under its holder (ABA).

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::VerbOutcome;
use crate::slice::Slice;
use crate::utils::Backoff;

/// Exclusive-write bit of the packed lock word.
pub const WRITE_BIT: u32 = 1 << 31;
/// Sticky tombstone bit of the packed lock word.
pub const DELETED_BIT: u32 = 1 << 30;
/// Relocation tombstone bit of the packed lock word (set by a
/// compaction this crate doesn't itself perform, but leaves room for).
pub const MOVED_BIT: u32 = 1 << 29;
/// Mask over the remaining 29 bits, which count outstanding readers.
pub const READER_MASK: u32 = MOVED_BIT - 1;

/// Size in bytes of the in-band header prefixing every allocated slice.
pub const HEADER_SIZE: usize = 8;
/// Required alignment of the in-band header.
pub const HEADER_ALIGN: usize = 4;

/// The packed lock-state word plus the generation counter for one slice.
///
/// Lives at the very start of the bytes an allocator hands back; the
/// usable payload starts at `HEADER_SIZE` bytes past the allocation's
/// base offset.
#[repr(C)]
pub struct ValueHeader {
    lock: AtomicU32,
    generation: AtomicU32,
}

impl ValueHeader {
    /// Initializes a freshly allocated header: unlocked, not deleted,
    /// stamped with `generation`.
    pub fn init(&self, generation: u32) {
        self.lock.store(0, Ordering::Relaxed);
        self.generation.store(generation, Ordering::Release);
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    fn raw(&self) -> u32 {
        self.lock.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.raw() & DELETED_BIT != 0
    }

    #[inline]
    pub fn is_moved(&self) -> bool {
        self.raw() & MOVED_BIT != 0
    }

    /// Validates `slice` against this header: a generation mismatch
    /// means the slot was freed and reallocated since `slice` was
    /// handed out, and a `MOVED` tombstone means the value has been
    /// relocated by a compaction this crate doesn't itself perform (but
    /// leaves room for). Both are retry signals, not errors: the caller
    /// re-resolves the key and tries again.
    pub fn attach(&self, slice: &Slice) -> Result<(), ()> {
        if self.generation() != slice.generation() {
            #[cfg(feature = "logging")]
            tracing::trace!(
                block = slice.block().get(),
                offset = slice.offset(),
                expected = slice.generation(),
                actual = self.generation(),
                "generation mismatch, signaling retry"
            );
            return Err(());
        }
        if self.is_moved() {
            return Err(());
        }
        Ok(())
    }

    /// Acquires a shared read lock, spinning/yielding through
    /// contention. Returns `VerbOutcome::False` immediately if the slice
    /// is observably deleted rather than spinning forever against a
    /// value that will never unlock.
    pub fn lock_read(&self) -> VerbOutcome<ReadGuard<'_>> {
        let mut backoff = Backoff::new();
        loop {
            let raw = self.lock.load(Ordering::Acquire);
            if raw & DELETED_BIT != 0 {
                return VerbOutcome::False;
            }
            if raw & (WRITE_BIT | MOVED_BIT) != 0 {
                backoff.spin_or_yield();
                continue;
            }
            let readers = raw & READER_MASK;
            if readers == READER_MASK {
                // Reader count saturated; back off rather than overflow.
                backoff.spin_or_yield();
                continue;
            }
            let next = raw + 1;
            if self
                .lock
                .compare_exchange_weak(raw, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return VerbOutcome::Ok(ReadGuard { header: self });
            }
            backoff.spin();
        }
    }

    fn unlock_read(&self) {
        let prev = self.lock.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & READER_MASK != 0, "unlock_read underflowed reader count");
    }

    /// Acquires the exclusive write lock, spinning/yielding through
    /// contention from either readers or another writer. Returns
    /// `VerbOutcome::False` if the slice is observably deleted.
    pub fn lock_write(&self) -> VerbOutcome<WriteGuard<'_>> {
        let mut backoff = Backoff::new();
        loop {
            let raw = self.lock.load(Ordering::Acquire);
            if raw & DELETED_BIT != 0 {
                return VerbOutcome::False;
            }
            if raw & (WRITE_BIT | MOVED_BIT) != 0 || raw & READER_MASK != 0 {
                backoff.spin_or_yield();
                continue;
            }
            if self
                .lock
                .compare_exchange_weak(raw, WRITE_BIT, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return VerbOutcome::Ok(WriteGuard { header: self });
            }
            backoff.spin();
        }
    }

    fn unlock_write(&self) {
        let prev = self.lock.fetch_and(!WRITE_BIT, Ordering::AcqRel);
        debug_assert!(prev & WRITE_BIT != 0, "unlock_write called without the write lock held");
    }

    /// Marks the slice logically deleted. Caller must already hold the
    /// write lock (consumed by reference here, not by value, so the
    /// guard still releases normally on drop).
    pub fn mark_deleted(&self, _write: &WriteGuard<'_>) {
        self.lock.fetch_or(DELETED_BIT, Ordering::AcqRel);
    }

    /// Marks the slice moved: its current storage no longer fits the
    /// value and the caller (the index layer) must reallocate elsewhere.
    /// Caller must already hold the write lock. Sticky like `DELETED` —
    /// every subsequent `attach` on this generation sees `is_moved()` and
    /// reports `RETRY` until the slot is itself reclaimed and reused.
    pub fn mark_moved(&self, _write: &WriteGuard<'_>) {
        self.lock.fetch_or(MOVED_BIT, Ordering::AcqRel);
    }
}

/// RAII shared-read hold; releases on drop regardless of how the scope
/// that created it exits, including a panicking user closure.
pub struct ReadGuard<'a> {
    header: &'a ValueHeader,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.header.unlock_read();
    }
}

/// RAII exclusive-write hold; releases on drop regardless of how the
/// scope that created it exits.
pub struct WriteGuard<'a> {
    header: &'a ValueHeader,
}

impl WriteGuard<'_> {
    /// Marks the slice deleted while still holding the write lock. The
    /// `DELETED` bit then sticks even after this guard drops and clears
    /// `WRITE`.
    pub fn delete(&self) {
        self.header.mark_deleted(self);
    }

    /// Marks the slice moved while still holding the write lock, for a
    /// `put` whose new value no longer fits the current storage.
    pub fn mark_moved(&self) {
        self.header.mark_moved(self);
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.header.unlock_write();
    }
}
