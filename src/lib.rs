//! Concurrent off-heap value-slice storage core.
//!
//! This crate is the value-storage layer underneath an embedded
//! ordered key-value map: a block-based off-heap allocator, a
//! per-slice lock/version header protocol, and the value-operation
//! verb layer built on top of them. It does not order keys, scan
//! ranges, persist, replicate, or garbage-collect beyond reclaiming a
//! deleted slice's own storage — those are the map layer's job.

pub mod allocator;
pub mod block;
pub mod error;
pub mod header;
pub mod ops;
pub mod serializer;
pub mod slice;
pub mod thread_context;
pub mod utils;
pub mod view;

pub use allocator::{BlockAllocator, SeqExpand, SyncRecycle};
pub use block::{Block, BlockId, BlockPool};
pub use error::{SliceError, SliceResult, VerbOutcome};
pub use header::ValueHeader;
pub use ops::ValueOperations;
pub use slice::Slice;
pub use thread_context::ThreadContext;
pub use view::{MemorySpan, MemorySpanMut};
