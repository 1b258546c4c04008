//! The batching stage.
//!
//! - [`BatchSpec`] is the immutable stage definition: batch size, remainder
//!   policy, copy mode, and the derived output shapes and cardinality.
//! - [`BatchIterator`] pulls `batch_size` elements at a time from its upstream
//!   cursor and stacks them into one tensor per component, optionally fanning
//!   the copies out over the [`WorkerPool`](crate::pool::WorkerPool).
//! - [`BatchDatasetOp`] validates op arguments for both protocol versions and
//!   builds a [`BatchSpec`].

pub mod iterator;
pub mod op;
pub mod spec;

pub use iterator::{BatchIterator, INPUT_IMPL_EMPTY};
pub use op::{BatchDatasetOp, OpVersion};
pub use spec::BatchSpec;
