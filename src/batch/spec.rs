//! Immutable definition of a batching stage.

use crate::batch::iterator::BatchIterator;
use crate::batch::op::OpVersion;
use crate::dataset::{Cardinality, Dataset, DatasetIterator, IteratorContext};
use crate::error::BatchError;
use crate::naming;
use crate::plan::{PlanBuilder, PlanNodeId, PlanValue};
use crate::state::StateReader;
use crate::tensor::{DType, Dim, PartialShape};
use anyhow::{Result, bail};
use std::fmt;
use std::sync::Arc;

pub(crate) const DATASET_TYPE: &str = "Batch";

/// Groups consecutive upstream elements into batches of `batch_size`.
///
/// Output component `c` stacks component `c` of every element in the window
/// along a new leading dimension. The leading dimension is `batch_size` when
/// `drop_remainder` is set and unknown otherwise, since the final batch may be
/// short.
pub struct BatchSpec {
    input: Arc<dyn Dataset>,
    batch_size: usize,
    drop_remainder: bool,
    parallel_copy: bool,
    op_version: OpVersion,
    input_cardinality: Cardinality,
    output_shapes: Vec<PartialShape>,
}

impl BatchSpec {
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConfig`] if `batch_size` is not positive.
    pub fn new(
        input: Arc<dyn Dataset>,
        batch_size: i64,
        drop_remainder: bool,
        parallel_copy: bool,
    ) -> Result<Self> {
        if batch_size <= 0 {
            bail!(BatchError::config("Batch size must be greater than zero."));
        }
        let batch_size = usize::try_from(batch_size)
            .map_err(|_| BatchError::config(format!("Batch size {batch_size} is too large.")))?;

        let leading = PartialShape::new(vec![if drop_remainder {
            Dim::Known(batch_size)
        } else {
            Dim::Unknown
        }]);
        let output_shapes = input
            .output_shapes()
            .iter()
            .map(|shape| leading.concatenate(shape))
            .collect();

        Ok(Self {
            input_cardinality: input.cardinality(),
            input,
            batch_size,
            drop_remainder,
            parallel_copy,
            op_version: OpVersion::V2,
            output_shapes,
        })
    }

    #[must_use]
    pub fn with_op_version(mut self, op_version: OpVersion) -> Self {
        self.op_version = op_version;
        self
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn drop_remainder(&self) -> bool {
        self.drop_remainder
    }

    #[must_use]
    pub fn parallel_copy(&self) -> bool {
        self.parallel_copy
    }

    #[must_use]
    pub fn op_version(&self) -> OpVersion {
        self.op_version
    }

    #[must_use]
    pub fn input(&self) -> &Arc<dyn Dataset> {
        &self.input
    }

    pub(crate) fn iterator_prefix(&self, parent_prefix: &str) -> String {
        naming::iterator_prefix(DATASET_TYPE, parent_prefix, self.op_version.number())
    }

    /// Build a resuming iterator straight from checkpointed state, without
    /// initializing a fresh upstream cursor first.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream state cannot be restored.
    pub fn restore_batch_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
        reader: &dyn StateReader,
    ) -> Result<BatchIterator> {
        let prefix = self.iterator_prefix(parent_prefix);
        BatchIterator::restore_from(self, ctx, prefix, reader)
    }
}

/// Batches produced by `n` elements.
fn batched_cardinality(n: u64, batch_size: u64, drop_remainder: bool) -> u64 {
    n / batch_size + u64::from(n % batch_size != 0 && !drop_remainder)
}

impl Dataset for BatchSpec {
    fn output_dtypes(&self) -> &[DType] {
        self.input.output_dtypes()
    }

    fn output_shapes(&self) -> &[PartialShape] {
        &self.output_shapes
    }

    fn cardinality(&self) -> Cardinality {
        match self.input_cardinality {
            Cardinality::Finite(n) => Cardinality::Finite(batched_cardinality(
                n,
                self.batch_size as u64,
                self.drop_remainder,
            )),
            other => other,
        }
    }

    fn debug_string(&self) -> String {
        naming::dataset_debug_string(
            DATASET_TYPE,
            self.op_version.number(),
            &[self.batch_size.to_string()],
        )
    }

    fn make_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        let prefix = self.iterator_prefix(parent_prefix);
        Ok(Box::new(BatchIterator::initialize(self, ctx, prefix)?))
    }

    fn restore_iterator(
        self: Arc<Self>,
        ctx: &IteratorContext,
        parent_prefix: &str,
        reader: &dyn StateReader,
    ) -> Result<Box<dyn DatasetIterator>> {
        Ok(Box::new(self.restore_batch_iterator(ctx, parent_prefix, reader)?))
    }

    fn to_plan(&self, builder: &mut PlanBuilder) -> Result<PlanNodeId> {
        let input = self.input.to_plan(builder)?;
        let mut scalars = vec![("batch_size", PlanValue::Int(self.batch_size as i64))];
        if self.op_version == OpVersion::V2 {
            scalars.push(("drop_remainder", PlanValue::Bool(self.drop_remainder)));
        }
        Ok(builder.add_dataset(
            self.op_version.op_name(),
            vec![input],
            scalars,
            vec![("parallel_copy", PlanValue::Bool(self.parallel_copy))],
        ))
    }
}

impl fmt::Debug for BatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpec")
            .field("input", &self.input.debug_string())
            .field("batch_size", &self.batch_size)
            .field("drop_remainder", &self.drop_remainder)
            .field("parallel_copy", &self.parallel_copy)
            .field("op_version", &self.op_version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_arithmetic() {
        assert_eq!(batched_cardinality(7, 3, false), 3);
        assert_eq!(batched_cardinality(7, 3, true), 2);
        assert_eq!(batched_cardinality(6, 3, false), 2);
        assert_eq!(batched_cardinality(6, 3, true), 2);
        assert_eq!(batched_cardinality(0, 3, false), 0);
        assert_eq!(batched_cardinality(2, 3, true), 0);
        assert_eq!(batched_cardinality(2, 3, false), 1);
    }
}
