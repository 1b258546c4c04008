//! Testing utilities for batch pipelines.
//!
//! - **Fixtures**: small datasets with checkpoint support, plus wrappers that
//!   count pulls or inject upstream failures
//! - **Allocators**: [`LimitedAllocator`] to exercise allocation failure
//! - **Assertions**: draining iterators and comparing batches byte for byte
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tensor_batch::*;
//! use tensor_batch::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = IteratorContext::default();
//! let spec = Arc::new(BatchSpec::new(Arc::new(RangeDataset::new(0, 7)), 3, false, false)?);
//! let it = spec.make_iterator(&ctx, "Iterator")?;
//!
//! let batches = drain(it.as_ref(), &ctx)?;
//! assert_eq!(batch_values::<i64>(&batches, 0)?, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::{assert_batches_identical, batch_values, drain, take};
pub use fixtures::{
    CountingDataset, FaultyDataset, InjectedFault, LimitedAllocator, RangeDataset, TensorsDataset,
};
