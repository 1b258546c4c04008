//! Fixture datasets and allocators for exercising pipeline stages.
//!
//! - [`RangeDataset`]: `int64` scalars `start, start + 1, ...`, finite or infinite.
//! - [`TensorsDataset`]: a fixed list of elements, optionally with unknown cardinality.
//! - [`CountingDataset`]: wraps a dataset and counts upstream pulls.
//! - [`FaultyDataset`]: wraps a dataset and fails on the k-th pull.
//! - [`LimitedAllocator`]: refuses allocations above a byte cap.

use crate::allocator::{Allocator, HeapAllocator};
use crate::dataset::{Cardinality, Dataset, DatasetIterator, Element, IteratorContext};
use crate::model::ModelNode;
use crate::naming;
use crate::plan::{PlanBuilder, PlanNodeId, PlanValue};
use crate::state::{StateReader, StateValue, StateWriter, full_name};
use crate::tensor::{DType, Dim, PartialShape, Tensor};
use anyhow::{Result, anyhow, bail};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

const NEXT: &str = "next";

fn lock<'a, T>(mutex: &'a Mutex<T>, prefix: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("iterator {prefix} lock poisoned"))
}

// ---------------------------------------------------------------------------
// Range
// ---------------------------------------------------------------------------

/// Scalar `int64` elements counting up from `start`.
#[derive(Debug)]
pub struct RangeDataset {
    start: i64,
    stop: Option<i64>,
    dtypes: Vec<DType>,
    shapes: Vec<PartialShape>,
}

impl RangeDataset {
    /// Elements `start..stop`.
    #[must_use]
    pub fn new(start: i64, stop: i64) -> Self {
        Self::with_stop(start, Some(stop))
    }

    /// Elements `start..` without end.
    #[must_use]
    pub fn infinite(start: i64) -> Self {
        Self::with_stop(start, None)
    }

    fn with_stop(start: i64, stop: Option<i64>) -> Self {
        Self {
            start,
            stop,
            dtypes: vec![DType::I64],
            shapes: vec![PartialShape::new(Vec::new())],
        }
    }
}

impl Dataset for RangeDataset {
    fn output_dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    fn output_shapes(&self) -> &[PartialShape] {
        &self.shapes
    }

    fn cardinality(&self) -> Cardinality {
        match self.stop {
            Some(stop) if stop > self.start => Cardinality::Finite(stop.abs_diff(self.start)),
            Some(_) => Cardinality::Finite(0),
            None => Cardinality::Infinite,
        }
    }

    fn debug_string(&self) -> String {
        let stop = self.stop.map_or_else(|| "inf".to_string(), |s| s.to_string());
        naming::dataset_debug_string("Range", 1, &[self.start.to_string(), stop])
    }

    fn make_iterator(
        self: Arc<Self>,
        _ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(RangeIterator {
            prefix: naming::iterator_prefix("Range", parent_prefix, 1),
            next: Mutex::new(self.start),
            stop: self.stop,
        }))
    }

    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId> {
        let mut scalars = vec![("start", PlanValue::Int(self.start))];
        if let Some(stop) = self.stop {
            scalars.push(("stop", PlanValue::Int(stop)));
        }
        Ok(builder.add_dataset("RangeDataset", Vec::new(), scalars, Vec::new()))
    }
}

struct RangeIterator {
    prefix: String,
    next: Mutex<i64>,
    stop: Option<i64>,
}

impl DatasetIterator for RangeIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_next(&self, _ctx: &IteratorContext) -> Result<Option<Element>> {
        let mut next = lock(&self.next, &self.prefix)?;
        if self.stop.is_some_and(|stop| *next >= stop) {
            return Ok(None);
        }
        let value = *next;
        *next += 1;
        Ok(Some(vec![Tensor::scalar(value)]))
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        let next = *lock(&self.next, &self.prefix)?;
        writer.write_scalar(&full_name(&self.prefix, NEXT), StateValue::Int(next))
    }

    fn restore(&self, _ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()> {
        let value = reader.read_scalar(&full_name(&self.prefix, NEXT))?.as_int()?;
        *lock(&self.next, &self.prefix)? = value;
        Ok(())
    }

    fn model_node(&self) -> ModelNode {
        ModelNode::Source {
            name: self.prefix.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Explicit tensors
// ---------------------------------------------------------------------------

/// Yields a fixed list of elements in order.
///
/// Declared shapes are taken from the elements: a dimension that differs
/// between elements is declared unknown.
#[derive(Debug)]
pub struct TensorsDataset {
    elements: Vec<Element>,
    dtypes: Vec<DType>,
    shapes: Vec<PartialShape>,
    cardinality: Cardinality,
}

impl TensorsDataset {
    /// # Errors
    ///
    /// Returns an error if `elements` is empty, since dtypes cannot be inferred.
    pub fn new(elements: Vec<Element>) -> Result<Self> {
        let Some(first) = elements.first() else {
            bail!("TensorsDataset needs at least one element");
        };
        let dtypes = first.iter().map(Tensor::dtype).collect();
        let mut shapes: Vec<PartialShape> =
            first.iter().map(|t| PartialShape::from(t.shape())).collect();
        for element in &elements[1..] {
            for (declared, tensor) in shapes.iter_mut().zip(element) {
                *declared = generalize(declared, tensor);
            }
        }
        Ok(Self {
            cardinality: Cardinality::Finite(elements.len() as u64),
            elements,
            dtypes,
            shapes,
        })
    }

    /// Declare `shapes` instead of the shapes inferred from the elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the component count differs or an element does not
    /// fit its declared shape.
    pub fn with_output_shapes(mut self, shapes: Vec<PartialShape>) -> Result<Self> {
        if shapes.len() != self.dtypes.len() {
            bail!(
                "declared {} shapes for {} components",
                shapes.len(),
                self.dtypes.len()
            );
        }
        for (index, element) in self.elements.iter().enumerate() {
            for (declared, tensor) in shapes.iter().zip(element) {
                if !declared.is_compatible_with(tensor.shape()) {
                    bail!(
                        "element {index} has shape {} which is not compatible with {declared}",
                        tensor.shape()
                    );
                }
            }
        }
        self.shapes = shapes;
        Ok(self)
    }

    /// Report [`Cardinality::Unknown`] instead of the element count.
    #[must_use]
    pub fn with_unknown_cardinality(mut self) -> Self {
        self.cardinality = Cardinality::Unknown;
        self
    }
}

fn generalize(declared: &PartialShape, tensor: &Tensor) -> PartialShape {
    match declared.dims() {
        Some(dims) if dims.len() == tensor.shape().rank() => PartialShape::new(
            dims.iter()
                .zip(tensor.shape().dims())
                .map(|(d, s)| match d {
                    Dim::Known(k) if k == s => Dim::Known(*k),
                    _ => Dim::Unknown,
                })
                .collect(),
        ),
        _ => PartialShape::unknown_rank(),
    }
}

impl Dataset for TensorsDataset {
    fn output_dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    fn output_shapes(&self) -> &[PartialShape] {
        &self.shapes
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn debug_string(&self) -> String {
        naming::dataset_debug_string("Tensors", 1, &[self.elements.len().to_string()])
    }

    fn make_iterator(
        self: Arc<Self>,
        _ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(TensorsIterator {
            prefix: naming::iterator_prefix("Tensors", parent_prefix, 1),
            dataset: self,
            next: Mutex::new(0),
        }))
    }

    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId> {
        Ok(builder.add_dataset(
            "TensorsDataset",
            Vec::new(),
            vec![("num_elements", PlanValue::Int(self.elements.len() as i64))],
            Vec::new(),
        ))
    }
}

struct TensorsIterator {
    prefix: String,
    dataset: Arc<TensorsDataset>,
    next: Mutex<usize>,
}

impl DatasetIterator for TensorsIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_next(&self, _ctx: &IteratorContext) -> Result<Option<Element>> {
        let mut next = lock(&self.next, &self.prefix)?;
        let Some(element) = self.dataset.elements.get(*next) else {
            return Ok(None);
        };
        *next += 1;
        Ok(Some(element.clone()))
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        let next = *lock(&self.next, &self.prefix)?;
        writer.write_scalar(&full_name(&self.prefix, NEXT), StateValue::Int(next as i64))
    }

    fn restore(&self, _ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()> {
        let value = reader.read_scalar(&full_name(&self.prefix, NEXT))?.as_int()?;
        let value = usize::try_from(value).map_err(|_| anyhow!("negative position {value}"))?;
        *lock(&self.next, &self.prefix)? = value;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// Passes elements through unchanged while counting `get_next` calls on the
/// wrapped cursor.
pub struct CountingDataset {
    inner: Arc<dyn Dataset>,
    pulls: Arc<AtomicUsize>,
}

impl CountingDataset {
    #[must_use]
    pub fn new(inner: Arc<dyn Dataset>) -> Self {
        Self {
            inner,
            pulls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of upstream pulls across all iterators of this dataset.
    #[must_use]
    pub fn pulls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulls)
    }
}

impl Dataset for CountingDataset {
    fn output_dtypes(&self) -> &[DType] {
        self.inner.output_dtypes()
    }

    fn output_shapes(&self) -> &[PartialShape] {
        self.inner.output_shapes()
    }

    fn cardinality(&self) -> Cardinality {
        self.inner.cardinality()
    }

    fn debug_string(&self) -> String {
        self.inner.debug_string()
    }

    fn make_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(CountingIterator {
            inner: Arc::clone(&self.inner).make_iterator(ctx, parent_prefix)?,
            pulls: Arc::clone(&self.pulls),
        }))
    }

    fn restore_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
        reader: &dyn StateReader,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(CountingIterator {
            inner: Arc::clone(&self.inner).restore_iterator(ctx, parent_prefix, reader)?,
            pulls: Arc::clone(&self.pulls),
        }))
    }

    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId> {
        self.inner.to_plan(builder)
    }
}

struct CountingIterator {
    inner: Box<dyn DatasetIterator>,
    pulls: Arc<AtomicUsize>,
}

impl DatasetIterator for CountingIterator {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_next(ctx)
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        self.inner.save(writer)
    }

    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()> {
        self.inner.restore(ctx, reader)
    }
}

/// Error produced by [`FaultyDataset`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("injected fault on pull {pull}")]
pub struct InjectedFault {
    pub pull: usize,
}

/// Fails with [`InjectedFault`] on pull number `fail_at` (0-indexed) of each
/// iterator, and passes every other pull through.
pub struct FaultyDataset {
    inner: Arc<dyn Dataset>,
    fail_at: usize,
}

impl FaultyDataset {
    #[must_use]
    pub fn new(inner: Arc<dyn Dataset>, fail_at: usize) -> Self {
        Self { inner, fail_at }
    }
}

impl Dataset for FaultyDataset {
    fn output_dtypes(&self) -> &[DType] {
        self.inner.output_dtypes()
    }

    fn output_shapes(&self) -> &[PartialShape] {
        self.inner.output_shapes()
    }

    fn cardinality(&self) -> Cardinality {
        self.inner.cardinality()
    }

    fn debug_string(&self) -> String {
        self.inner.debug_string()
    }

    fn make_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(FaultyIterator {
            inner: Arc::clone(&self.inner).make_iterator(ctx, parent_prefix)?,
            fail_at: self.fail_at,
            pulls: AtomicUsize::new(0),
        }))
    }

    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId> {
        self.inner.to_plan(builder)
    }
}

struct FaultyIterator {
    inner: Box<dyn DatasetIterator>,
    fail_at: usize,
    pulls: AtomicUsize,
}

impl DatasetIterator for FaultyIterator {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>> {
        let pull = self.pulls.fetch_add(1, Ordering::SeqCst);
        if pull == self.fail_at {
            bail!(InjectedFault { pull });
        }
        self.inner.get_next(ctx)
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        self.inner.save(writer)
    }

    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()> {
        self.inner.restore(ctx, reader)
    }
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Heap allocator that refuses any single request above `max_bytes`.
#[derive(Debug)]
pub struct LimitedAllocator {
    max_bytes: usize,
    refused: AtomicUsize,
}

impl LimitedAllocator {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            refused: AtomicUsize::new(0),
        }
    }

    /// Number of requests refused so far.
    #[must_use]
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }
}

impl Allocator for LimitedAllocator {
    fn name(&self) -> &str {
        "limited"
    }

    fn allocate(&self, num_bytes: usize) -> Option<Vec<u8>> {
        if num_bytes > self.max_bytes {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        HeapAllocator.allocate(num_bytes)
    }
}
