//! Cursor that materializes batches from an upstream cursor.

use crate::batch::spec::BatchSpec;
use crate::dataset::{Dataset, DatasetIterator, Element, IteratorContext};
use crate::error::BatchError;
use crate::model::ModelNode;
use crate::state::{StateReader, StateValue, StateWriter, full_name};
use crate::tensor::{Tensor, copy_element_to_slice};
use anyhow::{Error, Result, anyhow, bail};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Checkpoint key written once the upstream has been exhausted.
pub const INPUT_IMPL_EMPTY: &str = "input_impl_empty";

/// Upstream cursor, or `Drained` once it reported end of sequence. `Drained`
/// is terminal.
enum Cursor {
    Active(Box<dyn DatasetIterator>),
    Drained,
}

pub struct BatchIterator {
    spec: Arc<BatchSpec>,
    prefix: String,
    cursor: Mutex<Cursor>,
}

impl BatchIterator {
    /// Acquire a fresh upstream cursor and start at the first batch.
    ///
    /// # Errors
    ///
    /// Returns any error raised while initializing the upstream cursor.
    pub fn initialize(spec: Arc<BatchSpec>, ctx: &IteratorContext, prefix: String) -> Result<Self> {
        let input = Arc::clone(spec.input()).make_iterator(ctx, &prefix)?;
        Ok(Self {
            spec,
            prefix,
            cursor: Mutex::new(Cursor::Active(input)),
        })
    }

    pub(crate) fn restore_from(
        spec: Arc<BatchSpec>,
        ctx: &IteratorContext,
        prefix: String,
        reader: &dyn StateReader,
    ) -> Result<Self> {
        let cursor = restore_cursor(&spec, ctx, &prefix, reader)?;
        Ok(Self {
            spec,
            prefix,
            cursor: Mutex::new(cursor),
        })
    }

    #[must_use]
    pub fn spec(&self) -> &Arc<BatchSpec> {
        &self.spec
    }

    /// Whether the upstream has been exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor lock is poisoned.
    pub fn is_drained(&self) -> Result<bool> {
        Ok(matches!(*self.lock_cursor()?, Cursor::Drained))
    }

    fn lock_cursor(&self) -> Result<MutexGuard<'_, Cursor>> {
        self.cursor
            .lock()
            .map_err(|_| anyhow!("batch iterator {} lock poisoned", self.prefix))
    }

    /// Pull up to `batch_size` elements under the cursor lock.
    fn pull_window(&self, ctx: &IteratorContext) -> Result<Vec<Element>> {
        let mut cursor = self.lock_cursor()?;
        let Cursor::Active(input) = &*cursor else {
            return Ok(Vec::new());
        };

        let batch_size = self.spec.batch_size();
        let mut window = Vec::with_capacity(batch_size);
        let mut end_of_sequence = false;
        while window.len() < batch_size {
            match input.get_next(ctx)? {
                Some(element) => window.push(element),
                None => {
                    end_of_sequence = true;
                    break;
                }
            }
        }
        if end_of_sequence {
            tracing::debug!(prefix = %self.prefix, pulled = window.len(), "upstream drained");
            *cursor = Cursor::Drained;
        }
        Ok(window)
    }

    /// Stack the collected elements into one tensor per component.
    fn batch_window(&self, ctx: &IteratorContext, window: Vec<Element>) -> Result<Element> {
        let num_elements = window.len();
        let num_components = window[0].len();

        let mut columns: Vec<Vec<Tensor>> = (0..num_components)
            .map(|_| Vec::with_capacity(num_elements))
            .collect();
        for (index, element) in window.into_iter().enumerate() {
            if element.len() != num_components {
                bail!(BatchError::ComponentCountMismatch {
                    expected: num_components,
                    index,
                    actual: element.len(),
                });
            }
            for (column, tensor) in columns.iter_mut().zip(element) {
                column.push(tensor);
            }
        }

        columns
            .into_iter()
            .enumerate()
            .map(|(component_index, column)| self.batch_component(ctx, component_index, column))
            .collect()
    }

    fn batch_component(
        &self,
        ctx: &IteratorContext,
        component_index: usize,
        column: Vec<Tensor>,
    ) -> Result<Tensor> {
        let num_elements = column.len();
        // Captured by value: element 0 is consumed by its copy.
        let first_shape = column[0].shape().clone();
        let dtype = column[0].dtype();

        let batch_shape = first_shape.prepend(num_elements);
        let (Some(bytes), Some(slot_bytes)) =
            (batch_shape.num_bytes(dtype), first_shape.num_bytes(dtype))
        else {
            bail!(BatchError::ResourceExhausted {
                component_index,
                bytes: usize::MAX,
            });
        };
        let mut batch = Tensor::allocate(ctx.allocator(), dtype, batch_shape).ok_or(
            BatchError::ResourceExhausted {
                component_index,
                bytes,
            },
        )?;

        let slots: Vec<&mut [u8]> = if slot_bytes == 0 {
            (0..num_elements).map(|_| <&mut [u8]>::default()).collect()
        } else {
            batch.as_bytes_mut().chunks_mut(slot_bytes).collect()
        };

        let status: Mutex<Option<Error>> = Mutex::new(None);
        let record = |err: Error| {
            status
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(err);
        };
        let check_shape = |index: usize, element: &Tensor| -> Result<()> {
            if element.shape() != &first_shape {
                bail!(BatchError::ShapeMismatch {
                    component_index,
                    first: first_shape.clone(),
                    index,
                    actual: element.shape().clone(),
                });
            }
            Ok(())
        };

        if self.spec.parallel_copy() {
            ctx.pool().scope(|s| -> Result<()> {
                for (index, (element, slot)) in column.into_iter().zip(slots).enumerate() {
                    // Copies already spawned still finish before the scope returns.
                    check_shape(index, &element)?;
                    let record = &record;
                    s.spawn(move |_| {
                        if let Err(err) =
                            copy_element_to_slice(element, dtype, slot, component_index, index)
                        {
                            record(err);
                        }
                    });
                }
                Ok(())
            })?;
        } else {
            for (index, (element, slot)) in column.into_iter().zip(slots).enumerate() {
                check_shape(index, &element)?;
                if let Err(err) = copy_element_to_slice(element, dtype, slot, component_index, index)
                {
                    record(err);
                }
            }
        }

        match status.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(err) => Err(err),
            None => Ok(batch),
        }
    }
}

fn restore_cursor(
    spec: &Arc<BatchSpec>,
    ctx: &IteratorContext,
    prefix: &str,
    reader: &dyn StateReader,
) -> Result<Cursor> {
    if reader.contains(&full_name(prefix, INPUT_IMPL_EMPTY)) {
        return Ok(Cursor::Drained);
    }
    let input = Arc::clone(spec.input()).restore_iterator(ctx, prefix, reader)?;
    Ok(Cursor::Active(input))
}

impl DatasetIterator for BatchIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>> {
        let window = self.pull_window(ctx)?;
        if window.is_empty() {
            return Ok(None);
        }

        if self.spec.drop_remainder() && window.len() < self.spec.batch_size() {
            tracing::debug!(
                prefix = %self.prefix,
                dropped = window.len(),
                "dropping short final batch"
            );
            return Ok(None);
        }

        let batch = self.batch_window(ctx, window)?;
        tracing::trace!(prefix = %self.prefix, components = batch.len(), "emitted batch");
        Ok(Some(batch))
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<()> {
        let cursor = self.lock_cursor()?;
        match &*cursor {
            Cursor::Drained => writer.write_scalar(
                &full_name(&self.prefix, INPUT_IMPL_EMPTY),
                StateValue::Str(String::new()),
            ),
            Cursor::Active(input) => input.save(writer),
        }
    }

    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<()> {
        let mut cursor = self.lock_cursor()?;
        *cursor = restore_cursor(&self.spec, ctx, &self.prefix, reader)?;
        tracing::debug!(
            prefix = %self.prefix,
            drained = matches!(*cursor, Cursor::Drained),
            "restored batch iterator"
        );
        Ok(())
    }

    fn model_node(&self) -> ModelNode {
        ModelNode::known_ratio(self.prefix.clone(), self.spec.batch_size() as f64)
    }
}
