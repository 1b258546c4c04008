//! Naming conventions shared by datasets and iterators.
//!
//! Iterator prefixes form a path from the root iterator down to each nested
//! iterator (`Iterator::BatchV2::Range`). Checkpoint keys are derived from
//! them, so they must be stable across runs.

/// Op name for a dataset type at a protocol version: `Batch`, 2 → `BatchDatasetV2`.
#[must_use]
pub fn op_name(dataset_type: &str, op_version: u32) -> String {
    if op_version <= 1 {
        format!("{dataset_type}Dataset")
    } else {
        format!("{dataset_type}DatasetV{op_version}")
    }
}

/// Prefix of an iterator nested under `parent`.
#[must_use]
pub fn iterator_prefix(dataset_type: &str, parent: &str, op_version: u32) -> String {
    if op_version <= 1 {
        format!("{parent}::{dataset_type}")
    } else {
        format!("{parent}::{dataset_type}V{op_version}")
    }
}

/// Human-readable dataset description, e.g. `BatchDatasetV2Op(32)::Dataset`.
#[must_use]
pub fn dataset_debug_string(dataset_type: &str, op_version: u32, args: &[String]) -> String {
    format!(
        "{}Op({})::Dataset",
        op_name(dataset_type, op_version),
        args.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_names() {
        assert_eq!(op_name("Batch", 1), "BatchDataset");
        assert_eq!(op_name("Batch", 2), "BatchDatasetV2");
        assert_eq!(iterator_prefix("Batch", "Iterator", 1), "Iterator::Batch");
        assert_eq!(iterator_prefix("Batch", "Iterator", 2), "Iterator::BatchV2");
        assert_eq!(
            dataset_debug_string("Batch", 2, &["32".to_string()]),
            "BatchDatasetV2Op(32)::Dataset"
        );
        assert_eq!(dataset_debug_string("Range", 1, &[]), "RangeDatasetOp()::Dataset");
    }
}
