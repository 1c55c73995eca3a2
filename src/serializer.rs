//! The serializer seam consumed by callers above this crate.
//!
//! This crate stores and hands back raw bytes; turning a typed value
//! into those bytes (and back) is a named collaborator's job, not
//! something implemented here. `Serializer` exists so call sites outside
//! this crate have a common shape to implement against.

use crate::error::SliceResult;

/// Converts a typed value to and from the raw bytes this crate stores.
///
/// No implementation ships in this crate; the ordered index and map API
/// layers above provide one.
pub trait Serializer<T> {
    /// Exact encoded size of `value`, used to size the allocation before
    /// `put`/`compute` writes it.
    fn size(&self, value: &T) -> usize;

    /// Encodes `value` into `out`, which is exactly `size(value)` bytes
    /// long.
    fn serialize(&self, value: &T, out: &mut [u8]) -> SliceResult<()>;

    /// Decodes a value previously written by `serialize` from `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> SliceResult<T>;
}
