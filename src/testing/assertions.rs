//! Helpers for pulling and inspecting batches in tests.

use crate::dataset::{DatasetIterator, Element, IteratorContext};
use crate::tensor::TensorValue;
use anyhow::{Context, Result};

/// Pull from `iterator` until end of sequence.
///
/// # Errors
///
/// Returns the first error raised by the iterator.
pub fn drain(iterator: &dyn DatasetIterator, ctx: &IteratorContext) -> Result<Vec<Element>> {
    let mut out = Vec::new();
    while let Some(element) = iterator.get_next(ctx)? {
        out.push(element);
    }
    Ok(out)
}

/// Pull at most `n` elements, stopping early at end of sequence.
///
/// # Errors
///
/// Returns the first error raised by the iterator.
pub fn take(iterator: &dyn DatasetIterator, ctx: &IteratorContext, n: usize) -> Result<Vec<Element>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        match iterator.get_next(ctx)? {
            Some(element) => out.push(element),
            None => break,
        }
    }
    Ok(out)
}

/// Flattened values of component `component` of every batch.
///
/// # Errors
///
/// Returns an error if a batch lacks the component or its dtype is not `T`.
pub fn batch_values<T: TensorValue>(batches: &[Element], component: usize) -> Result<Vec<Vec<T>>> {
    batches
        .iter()
        .enumerate()
        .map(|(i, batch)| {
            batch
                .get(component)
                .with_context(|| format!("batch {i} has no component {component}"))?
                .to_values::<T>()
        })
        .collect()
}

/// Assert that two batch sequences are identical down to the byte.
///
/// # Panics
///
/// Panics if the sequences differ in length, dtype, shape or content.
pub fn assert_batches_identical(actual: &[Element], expected: &[Element]) {
    assert_eq!(actual.len(), expected.len(), "number of batches differs");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(a.len(), e.len(), "batch {i}: component count differs");
        for (c, (at, et)) in a.iter().zip(e).enumerate() {
            assert_eq!(at.dtype(), et.dtype(), "batch {i} component {c}: dtype differs");
            assert_eq!(at.shape(), et.shape(), "batch {i} component {c}: shape differs");
            assert_eq!(at.as_bytes(), et.as_bytes(), "batch {i} component {c}: bytes differ");
        }
    }
}
