//! The pull-based dataset contract.
//!
//! A [`Dataset`] is an immutable definition: it knows its per-component dtypes
//! and shapes, its [`Cardinality`], and how to create cursors over itself. A
//! [`DatasetIterator`] is one such cursor: callers pull elements with
//! [`get_next`](DatasetIterator::get_next) until it returns `Ok(None)`, and can
//! snapshot or rebuild its position through the [`state`](crate::state) traits.
//!
//! Iterators take `&self` everywhere and guard their position internally, so a
//! single cursor may be driven from several threads.

use crate::allocator::{Allocator, HeapAllocator};
use crate::model::ModelNode;
use crate::plan::{PlanBuilder, PlanNodeId};
use crate::pool::WorkerPool;
use crate::state::{StateReader, StateWriter};
use crate::tensor::{DType, PartialShape, Tensor};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One upstream-produced tuple of tensors.
pub type Element = Vec<Tensor>;

/// Number of elements a fully consumed dataset yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    Finite(u64),
    Infinite,
    Unknown,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Infinite => f.write_str("infinite"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Resources shared by every iterator of one pipeline run.
#[derive(Clone)]
pub struct IteratorContext {
    allocator: Arc<dyn Allocator>,
    pool: WorkerPool,
}

impl IteratorContext {
    #[must_use]
    pub fn new(allocator: Arc<dyn Allocator>, pool: WorkerPool) -> Self {
        Self { allocator, pool }
    }

    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Default for IteratorContext {
    fn default() -> Self {
        Self {
            allocator: Arc::new(HeapAllocator),
            pool: WorkerPool::global(),
        }
    }
}

impl fmt::Debug for IteratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IteratorContext")
            .field("allocator", &self.allocator.name())
            .field("pool", &self.pool)
            .finish()
    }
}

pub trait Dataset: Send + Sync {
    fn output_dtypes(&self) -> &[DType];

    fn output_shapes(&self) -> &[PartialShape];

    fn cardinality(&self) -> Cardinality;

    fn debug_string(&self) -> String;

    /// Create a fresh cursor positioned at the first element.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor (or any cursor it depends on) cannot be
    /// initialized.
    fn make_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>>;

    /// Create a cursor positioned where a previously saved one stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the state in `reader` is missing or malformed.
    fn restore_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
        reader: &dyn StateReader,
    ) -> Result<Box<dyn DatasetIterator>> {
        let iterator = self.make_iterator(ctx, parent_prefix)?;
        iterator.restore(ctx, reader)?;
        Ok(iterator)
    }

    /// Describe this dataset (and its inputs) as plan nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if an input cannot be described.
    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId>;
}

pub trait DatasetIterator: Send + Sync {
    /// Stable path of this iterator, used to namespace checkpoint keys.
    fn prefix(&self) -> &str;

    /// Pull the next element; `Ok(None)` marks the end of the sequence.
    ///
    /// # Errors
    ///
    /// Returns any error raised while producing the element.
    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>>;

    /// # Errors
    ///
    /// Returns an error if the position cannot be written.
    fn save(&self, writer: &mut dyn StateWriter) -> Result<()>;

    /// # Errors
    ///
    /// Returns an error if the saved position is missing or malformed.
    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()>;

    fn model_node(&self) -> ModelNode {
        ModelNode::UnknownRatio {
            name: self.prefix().to_string(),
        }
    }
}
