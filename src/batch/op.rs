//! Construction of batch stages from op arguments.
//!
//! Two protocol versions exist. `BatchDataset` (v1) takes only a batch size and
//! never drops the remainder; `BatchDatasetV2` additionally requires a
//! `drop_remainder` argument. Both accept an optional `parallel_copy` attribute.

use crate::batch::spec::{BatchSpec, DATASET_TYPE};
use crate::config::BatchOptions;
use crate::dataset::Dataset;
use crate::error::BatchError;
use crate::naming;
use anyhow::{Result, bail};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpVersion {
    V1,
    V2,
}

impl OpVersion {
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConfig`] for names other than
    /// `BatchDataset` and `BatchDatasetV2`.
    pub fn from_op_name(name: &str) -> Result<Self> {
        [Self::V1, Self::V2]
            .into_iter()
            .find(|v| v.op_name() == name)
            .ok_or_else(|| BatchError::config(format!("unknown batch op {name:?}")).into())
    }

    #[must_use]
    pub fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    #[must_use]
    pub fn op_name(self) -> String {
        naming::op_name(DATASET_TYPE, self.number())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchDatasetOp {
    op_version: OpVersion,
    parallel_copy: bool,
}

impl BatchDatasetOp {
    /// `parallel_copy` is the optional op attribute; absent means `false`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConfig`] if `op_name` is not a batch op.
    pub fn new(op_name: &str, parallel_copy: Option<bool>) -> Result<Self> {
        Ok(Self {
            op_version: OpVersion::from_op_name(op_name)?,
            parallel_copy: parallel_copy.unwrap_or(false),
        })
    }

    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConfig`] if `options.op` is not a batch op.
    pub fn from_options(options: &BatchOptions) -> Result<Self> {
        Self::new(&options.op, options.parallel_copy)
    }

    #[must_use]
    pub fn op_version(&self) -> OpVersion {
        self.op_version
    }

    /// Validate the op arguments and build the stage over `input`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConfig`] if `batch_size` is not positive, if
    /// a v1 op is given `drop_remainder`, or if a v2 op is missing it.
    pub fn make_dataset(
        &self,
        input: Arc<dyn Dataset>,
        batch_size: i64,
        drop_remainder: Option<bool>,
    ) -> Result<Arc<BatchSpec>> {
        let drop_remainder = match (self.op_version, drop_remainder) {
            (OpVersion::V1, None) => false,
            (OpVersion::V1, Some(_)) => bail!(BatchError::config(
                "BatchDataset does not accept a drop_remainder argument"
            )),
            (OpVersion::V2, Some(v)) => v,
            (OpVersion::V2, None) => bail!(BatchError::config(
                "BatchDatasetV2 requires a drop_remainder argument"
            )),
        };

        let spec = BatchSpec::new(input, batch_size, drop_remainder, self.parallel_copy)?
            .with_op_version(self.op_version);
        tracing::debug!(dataset = %spec.debug_string(), "created batch dataset");
        Ok(Arc::new(spec))
    }

    /// Shorthand for [`from_options`](Self::from_options) followed by
    /// [`make_dataset`](Self::make_dataset).
    ///
    /// # Errors
    ///
    /// See [`make_dataset`](Self::make_dataset).
    pub fn build(input: Arc<dyn Dataset>, options: &BatchOptions) -> Result<Arc<BatchSpec>> {
        Self::from_options(options)?.make_dataset(input, options.batch_size, options.drop_remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names_map_to_versions() {
        assert_eq!(OpVersion::from_op_name("BatchDataset").unwrap(), OpVersion::V1);
        assert_eq!(OpVersion::from_op_name("BatchDatasetV2").unwrap(), OpVersion::V2);
        assert!(OpVersion::from_op_name("PaddedBatchDataset").is_err());
    }

    #[test]
    fn parallel_copy_defaults_off() {
        let op = BatchDatasetOp::new("BatchDatasetV2", None).unwrap();
        assert_eq!(op.op_version(), OpVersion::V2);
        assert!(!op.parallel_copy);
        assert!(BatchDatasetOp::new("BatchDataset", Some(true)).unwrap().parallel_copy);
    }
}
