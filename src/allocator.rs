//! Byte-buffer allocation for batch outputs.
//!
//! The batching stage never calls the global allocator directly for its output
//! buffers; it asks the [`Allocator`] carried by the
//! [`IteratorContext`](crate::dataset::IteratorContext). A `None` result is
//! surfaced to the caller as
//! [`BatchError::ResourceExhausted`](crate::error::BatchError::ResourceExhausted).

/// Source of zero-initialized byte buffers.
pub trait Allocator: Send + Sync {
    fn name(&self) -> &str;

    /// Return a zero-filled buffer of exactly `num_bytes`, or `None` if the
    /// memory cannot be provided.
    fn allocate(&self, num_bytes: usize) -> Option<Vec<u8>>;
}

/// Allocates from the process heap, reporting failure instead of aborting.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn name(&self) -> &str {
        "heap"
    }

    fn allocate(&self, num_bytes: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(num_bytes).ok()?;
        buf.resize(num_bytes, 0);
        Some(buf)
    }
}
