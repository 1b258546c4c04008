//! # tensor-batch
//!
//! A **batching stage** for pull-based tensor pipelines. It pulls elements one
//! at a time from an upstream cursor and emits groups of `batch_size` elements
//! as single records, stacking each component along a new leading dimension.
//!
//! ## Key Features
//!
//! - **Strict shape checking** - every element of a batch must agree on each component's shape
//! - **Remainder policy** - keep or drop a short final batch
//! - **Parallel copy** - fan the per-element copies of a component out over a Rayon pool
//! - **Checkpoint/restore** - save an iterator's position and resume it exactly later
//! - **Derived metadata** - output shapes and cardinality without touching the data
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tensor_batch::*;
//! use tensor_batch::testing::RangeDataset;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let ctx = IteratorContext::default();
//! let input = Arc::new(RangeDataset::new(0, 7));
//! let batched = Arc::new(BatchSpec::new(input, 3, false, false)?);
//! assert_eq!(batched.cardinality(), Cardinality::Finite(3));
//!
//! let it = batched.make_iterator(&ctx, "Iterator")?;
//! while let Some(batch) = it.get_next(&ctx)? {
//!     println!("{:?}", batch[0].to_values::<i64>()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Datasets and iterators
//!
//! A [`Dataset`] is an immutable definition with known dtypes, partially known
//! shapes and a [`Cardinality`]. [`Dataset::make_iterator`] creates a
//! [`DatasetIterator`], a cursor that yields [`Element`]s until it returns
//! `Ok(None)`.
//!
//! ### The batch stage
//!
//! [`BatchSpec`] is itself a [`Dataset`] over an upstream dataset. Its iterator,
//! [`BatchIterator`], serializes upstream pulls under a lock and performs the
//! copy work outside of it. [`BatchDatasetOp`] builds a [`BatchSpec`] from op
//! arguments for both protocol versions, or from a [`BatchOptions`] document.
//!
//! ### Checkpoints
//!
//! [`DatasetIterator::save`] writes the iterator position into a
//! [`StateWriter`]; [`Dataset::restore_iterator`] rebuilds a cursor from a
//! [`StateReader`]. The [`checkpoint`] module persists that state to disk.
//!
//! ## Feature Flags
//!
//! - `checkpointing` - file-backed checkpoints (`postcard` + `sha2`), on by default
//!
//! ## Module Overview
//!
//! - [`batch`] - `BatchSpec`, `BatchIterator`, `BatchDatasetOp`
//! - [`dataset`] - the upstream contract and iterator context
//! - [`tensor`] - dtypes, shapes and tensors
//! - [`state`] / [`checkpoint`] - checkpoint key/value state and its persistence
//! - [`pool`] / [`allocator`] - worker pool and buffer allocation
//! - [`plan`] - plan-graph serialization
//! - [`testing`] - fixture datasets and assertions

pub mod allocator;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod naming;
pub mod plan;
pub mod pool;
pub mod state;
pub mod tensor;
pub mod testing;

// General re-exports
pub use allocator::{Allocator, HeapAllocator};
pub use batch::{BatchDatasetOp, BatchIterator, BatchSpec, OpVersion};
pub use config::BatchOptions;
pub use dataset::{Cardinality, Dataset, DatasetIterator, Element, IteratorContext};
pub use error::BatchError;
pub use model::ModelNode;
pub use plan::{Plan, PlanBuilder, PlanNode, PlanNodeId, PlanValue};
pub use pool::WorkerPool;
pub use state::{MemoryState, StateReader, StateValue, StateWriter};
pub use tensor::{DType, Dim, PartialShape, Tensor, TensorShape, TensorValue};

// Gated re-exports
#[cfg(feature = "checkpointing")]
pub use checkpoint::{CheckpointConfig, CheckpointManager, CheckpointPolicy};
