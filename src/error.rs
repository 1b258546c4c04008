//! Error taxonomy for the batching stage.
//!
//! Operations in this crate return [`anyhow::Result`]. Failures the stage itself
//! detects are raised as a [`BatchError`], so callers can tell them apart with
//! `err.downcast_ref::<BatchError>()`. Errors coming from the upstream iterator
//! are passed through untouched.

use crate::tensor::{DType, TensorShape};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    /// Rejected construction-time argument (e.g. a non-positive batch size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Cannot batch tensors with different shapes in component {component_index}. \
         First element had shape {first} and element {index} had shape {actual}."
    )]
    ShapeMismatch {
        component_index: usize,
        first: TensorShape,
        index: usize,
        actual: TensorShape,
    },

    #[error(
        "Cannot batch elements with different numbers of components. \
         First element had {expected} components and element {index} had {actual}."
    )]
    ComponentCountMismatch {
        expected: usize,
        index: usize,
        actual: usize,
    },

    #[error(
        "Cannot copy element {index} into the batch of component {component_index}: \
         expected dtype {expected} but got {actual}."
    )]
    DTypeMismatch {
        component_index: usize,
        index: usize,
        expected: DType,
        actual: DType,
    },

    /// The allocator could not provide the destination buffer.
    #[error("Failed to allocate memory for the batch of component {component_index} ({bytes} bytes)")]
    ResourceExhausted { component_index: usize, bytes: usize },

    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
}

impl BatchError {
    pub(crate) fn config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }
}
