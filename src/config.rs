//! Construction-time options for a batch stage.
//!
//! ```
//! use tensor_batch::config::BatchOptions;
//!
//! let options = BatchOptions::from_json_str(
//!     r#"{ "batch_size": 32, "drop_remainder": true, "parallel_copy": true }"#,
//! ).unwrap();
//! assert_eq!(options.op, "BatchDatasetV2");
//! assert_eq!(options.batch_size, 32);
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_op() -> String {
    "BatchDatasetV2".to_string()
}

/// Op name, arguments and attributes of one batch stage.
///
/// Values are only parsed here; [`BatchDatasetOp`](crate::batch::BatchDatasetOp)
/// validates them against the op version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// `BatchDataset` or `BatchDatasetV2`.
    #[serde(default = "default_op")]
    pub op: String,
    pub batch_size: i64,
    #[serde(default)]
    pub drop_remainder: Option<bool>,
    #[serde(default)]
    pub parallel_copy: Option<bool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            op: default_op(),
            batch_size: 1,
            drop_remainder: Some(false),
            parallel_copy: None,
        }
    }
}

impl BatchOptions {
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid options document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse batch options")
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch options from {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_options_omit_drop_remainder() {
        let options = BatchOptions::from_json_str(r#"{ "op": "BatchDataset", "batch_size": 4 }"#).unwrap();
        assert_eq!(options.op, "BatchDataset");
        assert_eq!(options.drop_remainder, None);
        assert_eq!(options.parallel_copy, None);
    }

    #[test]
    fn missing_batch_size_is_an_error() {
        assert!(BatchOptions::from_json_str(r#"{ "drop_remainder": true }"#).is_err());
    }
}
