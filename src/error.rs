//! Error types for the value-slice subsystem.
//!
//! `SliceError` covers the handful of ways a verb can genuinely fail
//! (allocation exhaustion, a caller-supplied offset outside the slice,
//! protocol misuse). It is deliberately not used for the routine,
//! expected outcomes of a verb call — those live in [`VerbOutcome`].

use core::fmt;

/// What went wrong attempting an allocation, a bounds-checked view, or a
/// verb call.
#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    /// No block in the pool (and none could be grown) had room for the
    /// request.
    #[error("out of memory: unable to satisfy a {requested}-byte allocation")]
    OutOfMemory {
        /// Size in bytes that could not be satisfied.
        requested: usize,
    },

    /// A caller-supplied offset/length fell outside a slice's allocated
    /// extent.
    #[error("out of bounds: index {index} exceeds slice length {len}")]
    OutOfBounds {
        /// The offset that was rejected.
        index: usize,
        /// The slice's allocated length.
        len: usize,
    },

    /// A caller violated the header lock/attach protocol in a way that
    /// isn't itself a concurrency retry (e.g. calling an operation on a
    /// slice that was never attached, or double-releasing a lock).
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
}

/// Result type for fallible, non-routine operations in this crate.
pub type SliceResult<T> = Result<T, SliceError>;

/// The three-valued result of a value operation.
///
/// Kept separate from [`SliceError`]/[`Result`] on purpose: `Retry` and
/// `False` are expected, routine outcomes of calling a verb under
/// contention or against a deleted/missing slice, not error conditions a
/// caller needs `?` or a `match` on `Err` to notice. Only [`SliceError`]
/// variants represent something actually wrong.
#[derive(Debug)]
pub enum VerbOutcome<T> {
    /// The verb completed and produced a value (`read`/`transform`'s
    /// caller-visible result, or `put`/`compute`'s prior value).
    Ok(T),
    /// The verb found the slice logically absent (deleted, or the
    /// attach protocol rejected it) — not an error, just "not there".
    False,
    /// The verb's attach protocol observed a stale generation or lost a
    /// lock race; the caller should re-resolve the slice and retry.
    Retry,
}

impl<T> VerbOutcome<T> {
    /// True if this outcome carries a value.
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, VerbOutcome::Ok(_))
    }

    /// True if the caller should re-resolve and retry the verb.
    #[inline]
    pub fn is_retry(&self) -> bool {
        matches!(self, VerbOutcome::Retry)
    }

    /// Maps the success value, leaving `False`/`Retry` untouched.
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VerbOutcome<U> {
        match self {
            VerbOutcome::Ok(v) => VerbOutcome::Ok(f(v)),
            VerbOutcome::False => VerbOutcome::False,
            VerbOutcome::Retry => VerbOutcome::Retry,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for VerbOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerbOutcome::Ok(v) => write!(f, "Ok({:?})", v),
            VerbOutcome::False => write!(f, "False"),
            VerbOutcome::Retry => write!(f, "Retry"),
        }
    }
}
