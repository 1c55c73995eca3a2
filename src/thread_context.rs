//! Per-thread scratch state for repeated verb calls.
//!
//! Mirrors the teacher's general preference for reusing per-thread
//! scratch space over allocating on every hot-path call: a
//! `ThreadContext` holds the key/value slice descriptors a caller is
//! currently working with plus a growable result buffer that
//! `transform`/`compute` closures can write into instead of allocating
//! their own `Vec` each call.

use crate::slice::Slice;

/// Scratch state owned by one worker thread.
///
/// Not `Sync`: each thread constructs (or is handed) its own, the same
/// way the teacher's bump/pool allocators keep mutable scratch state
/// thread-local rather than shared.
#[derive(Default)]
pub struct ThreadContext {
    key_slice: Option<Slice>,
    value_slice: Option<Slice>,
    result_buf: Vec<u8>,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn key_slice(&self) -> Option<Slice> {
        self.key_slice
    }

    #[inline]
    pub fn set_key_slice(&mut self, slice: Slice) {
        self.key_slice = Some(slice);
    }

    #[inline]
    pub fn value_slice(&self) -> Option<Slice> {
        self.value_slice
    }

    #[inline]
    pub fn set_value_slice(&mut self, slice: Slice) {
        self.value_slice = Some(slice);
    }

    pub fn clear(&mut self) {
        self.key_slice = None;
        self.value_slice = None;
    }

    /// A scratch buffer sized to at least `min_len` bytes, reused across
    /// calls rather than reallocated each time.
    pub fn result_buffer(&mut self, min_len: usize) -> &mut [u8] {
        if self.result_buf.len() < min_len {
            self.result_buf.resize(min_len, 0);
        }
        &mut self.result_buf[..min_len]
    }
}
