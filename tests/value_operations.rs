//! Integration tests for the value-operation verbs against both
//! allocator flavors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use slicecore::allocator::{SeqExpand, SyncRecycle};
use slicecore::error::{SliceResult, VerbOutcome};
use slicecore::ops::ValueOperations;
use slicecore::thread_context::ThreadContext;
use slicecore::BlockAllocator;

fn le_i32(n: i32) -> [u8; 4] {
    n.to_le_bytes()
}

fn packed_three_ints(a: i32, b: i32, c: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&le_i32(a));
    out.extend_from_slice(&le_i32(b));
    out.extend_from_slice(&le_i32(c));
    out
}

/// A byte-for-byte serializer over pre-encoded payloads, standing in
/// for the typed serializer a caller above this crate would supply.
struct RawBytes;

impl slicecore::serializer::Serializer<Vec<u8>> for RawBytes {
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
    let allocator = SyncRecycle::new(4096, 8);
    let ops = ValueOperations::new(&allocator);
    let slice = allocator.allocate(12, true).expect("allocation failed");

    ops.put(&slice, &packed_three_ints(10, 20, 12), &RawBytes).expect("put failed");

    let mut ctx = ThreadContext::new();
    let outcome = ops
        .transform(&mut ctx, &slice, 4, |view, out| {
            let bytes = view.get(0, 12)?;
            let a = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            let b = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
            let c = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
            out[..4].copy_from_slice(&(a + b + c).to_le_bytes());
            Ok(4)
        })
        .expect("transform failed");

    let written = match outcome {
        VerbOutcome::Ok(n) => n,
        other => panic!("expected Ok, got {other:?}"),
    };
    assert_eq!(i32::from_le_bytes(ctx.result_buffer(written).try_into().unwrap()), 42);
}

#[test]
fn transform_out_of_bounds_reports_an_error() {
    let allocator = SeqExpand::new(4096, 8);
    let ops = ValueOperations::new(&allocator);
    let slice = allocator.allocate(8, true).expect("allocation failed");
    ops.put(&slice, &vec![0u8; 8], &RawBytes).expect("put failed");

    let mut ctx = ThreadContext::new();
    let result = ops.transform(&mut ctx, &slice, 4, |view, out| {
        let bytes = view.get(4, 100)?;
        out[..4].copy_from_slice(&bytes[..4]);
        Ok(4)
    });
    assert!(result.is_err(), "an offset past the payload must be an error, not a panic");
}

#[test]
fn write_locked_blocks_transform() {
    let allocator = Arc::new(SyncRecycle::new(4096, 8));
    let slice = allocator.allocate(8, true).expect("allocation failed");
    allocator_ops(&*allocator).put(&slice, &vec![0u8; 8], &RawBytes).expect("put failed");

    let writer_has_lock = Arc::new(AtomicBool::new(false));
    let reader_observed_block = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(2));

    let alloc_writer = Arc::clone(&allocator);
    let has_lock = Arc::clone(&writer_has_lock);
    let barrier_writer = Arc::clone(&barrier);
    let writer_slice = slice;
    let writer = thread::spawn(move || {
        let ops = ValueOperations::new(&*alloc_writer);
        let _ = ops.compute(&writer_slice, |view| {
            has_lock.store(true, Ordering::SeqCst);
            barrier_writer.wait();
            thread::sleep(Duration::from_millis(150));
            view.write_all(&[1u8; 8])
        });
    });

    barrier.wait();
    // The writer now holds the write lock; a transform attempted while
    // it's held must observe the slot as locked, not proceed past it.
    while !writer_has_lock.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    let alloc_reader = Arc::clone(&allocator);
    let observed = Arc::clone(&reader_observed_block);
    let reader_slice = slice;
    let reader = thread::spawn(move || {
        let ops = ValueOperations::new(&*alloc_reader);
        let mut ctx = ThreadContext::new();
        let started = std::time::Instant::now();
        let _ = ops.transform(&mut ctx, &reader_slice, 8, |view, out| {
            out[..view.len()].copy_from_slice(view.get(0, view.len())?);
            Ok(view.len())
        });
        // If the reader had to wait any appreciable time, the writer's
        // exclusive hold blocked it as required.
        observed.store(started.elapsed() >= Duration::from_millis(50), Ordering::SeqCst);
    });

    writer.join().unwrap();
    reader.join().unwrap();
    assert!(reader_observed_block.load(Ordering::SeqCst), "transform should have waited for the writer");
}

#[test]
fn reader_blocks_writer() {
    let allocator = Arc::new(SyncRecycle::new(4096, 8));
    let slice = allocator.allocate(8, true).expect("allocation failed");
    allocator_ops(&*allocator).put(&slice, &vec![0u8; 8], &RawBytes).expect("put failed");

    let reader_has_lock = Arc::new(AtomicBool::new(false));
    let writer_waited = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(2));

    let alloc_reader = Arc::clone(&allocator);
    let has_lock = Arc::clone(&reader_has_lock);
    let barrier_reader = Arc::clone(&barrier);
    let reader_slice = slice;
    let reader = thread::spawn(move || {
        let ops = ValueOperations::new(&*alloc_reader);
        let mut ctx = ThreadContext::new();
        let _ = ops.transform(&mut ctx, &reader_slice, 8, |view, _out| {
            has_lock.store(true, Ordering::SeqCst);
            barrier_reader.wait();
            thread::sleep(Duration::from_millis(150));
            Ok(view.len())
        });
    });

    barrier.wait();
    while !reader_has_lock.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    let alloc_writer = Arc::clone(&allocator);
    let waited = Arc::clone(&writer_waited);
    let writer_slice = slice;
    let writer = thread::spawn(move || {
        let ops = ValueOperations::new(&*alloc_writer);
        let started = std::time::Instant::now();
        let _ = ops.put(&writer_slice, &vec![2u8; 8], &RawBytes);
        waited.store(started.elapsed() >= Duration::from_millis(50), Ordering::SeqCst);
    });

    reader.join().unwrap();
    writer.join().unwrap();
    assert!(writer_waited.load(Ordering::SeqCst), "put should have waited for the outstanding reader");
}

#[test]
fn delete_is_sticky() {
    let allocator = SyncRecycle::new(4096, 8);
    let ops = ValueOperations::new(&allocator);
    let slice = allocator.allocate(8, true).expect("allocation failed");
    ops.put(&slice, &vec![9u8; 8], &RawBytes).expect("put failed");

    assert!(matches!(ops.delete(&slice), Ok(VerbOutcome::Ok(()))));
    // A second delete on the same descriptor observes DELETED, not an error.
    assert!(matches!(ops.delete(&slice), Ok(VerbOutcome::False)));
    assert!(matches!(ops.read(&slice, |v| Ok(v.len())), Ok(VerbOutcome::False)));
}

#[test]
fn generation_mismatch_yields_retry() {
    let allocator = SyncRecycle::new(4096, 8);
    let ops = ValueOperations::new(&allocator);
    let slice = allocator.allocate(8, true).expect("allocation failed");
    ops.put(&slice, &vec![1u8; 8], &RawBytes).expect("put failed");
    ops.delete(&slice).expect("delete failed");

    // Reallocating the same size class should recycle this exact slot
    // with a bumped generation.
    let reused = allocator.allocate(8, true).expect("reallocation failed");
    assert_eq!(slice.block(), reused.block());
    assert_eq!(slice.offset(), reused.offset());
    assert_ne!(slice.generation(), reused.generation());

    // The caller still holding the original (now stale) descriptor must
    // be told to retry rather than silently touching the new occupant.
    assert!(matches!(ops.read(&slice, |v| Ok(v.len())), Ok(VerbOutcome::Retry)));
}

fn allocator_ops<A: BlockAllocator>(allocator: &A) -> ValueOperations<'_, A> {
    ValueOperations::new(allocator)
}
