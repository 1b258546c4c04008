//! Durable checkpoints of iterator state.
//!
//! A checkpoint is the [`MemoryState`] an iterator writes through
//! [`DatasetIterator::save`], encoded with `postcard` and stored on disk next to a
//! SHA-256 checksum of the encoded entries. Restoring reads the newest valid
//! checkpoint back and hands it to [`Dataset::restore_iterator`], so a fresh run
//! resumes with exactly the output the interrupted one would have produced.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tensor_batch::*;
//! use tensor_batch::checkpoint::{CheckpointConfig, CheckpointManager};
//! use tensor_batch::testing::RangeDataset;
//! # fn main() -> anyhow::Result<()> {
//! let ctx = IteratorContext::default();
//! let batched = Arc::new(BatchSpec::new(Arc::new(RangeDataset::new(0, 100)), 8, false, false)?);
//!
//! let mut manager = CheckpointManager::new(CheckpointConfig {
//!     enabled: true,
//!     directory: "./checkpoints".into(),
//!     ..Default::default()
//! })?;
//!
//! let it = Arc::clone(&batched).make_iterator(&ctx, "Iterator")?;
//! it.get_next(&ctx)?;
//! manager.save_iterator("job", it.as_ref())?;
//!
//! // later, in a new process
//! let resumed = manager.restore_latest("job", batched, &ctx, "Iterator")?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "checkpointing")]
use crate::dataset::{Dataset, DatasetIterator, IteratorContext};
#[cfg(feature = "checkpointing")]
use crate::error::BatchError;
#[cfg(feature = "checkpointing")]
use crate::state::MemoryState;
#[cfg(feature = "checkpointing")]
use anyhow::{Context, Result, bail};
#[cfg(feature = "checkpointing")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "checkpointing")]
use sha2::{Digest, Sha256};
#[cfg(feature = "checkpointing")]
use std::fs::{DirEntry, File, create_dir_all, read_dir, remove_file};
#[cfg(feature = "checkpointing")]
use std::io::{Read, Write};
#[cfg(feature = "checkpointing")]
use std::path::{Path, PathBuf};
#[cfg(feature = "checkpointing")]
use std::sync::Arc;
#[cfg(feature = "checkpointing")]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration for checkpoint behavior.
#[derive(Clone, Debug)]
#[cfg(feature = "checkpointing")]
pub struct CheckpointConfig {
    /// Enable or disable checkpointing.
    pub enabled: bool,
    /// Directory where checkpoint files are stored.
    pub directory: PathBuf,
    /// Policy determining when [`CheckpointManager::should_checkpoint`] fires.
    pub policy: CheckpointPolicy,
    /// Maximum number of checkpoints to retain per job (oldest are deleted first).
    /// None means keep all checkpoints.
    pub max_checkpoints: Option<usize>,
}

#[cfg(feature = "checkpointing")]
impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("./tensor_batch_checkpoints"),
            policy: CheckpointPolicy::Manual,
            max_checkpoints: Some(10),
        }
    }
}

/// When a driver loop should take a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg(feature = "checkpointing")]
pub enum CheckpointPolicy {
    /// Only when the caller asks for one.
    Manual,
    /// After every N emitted batches.
    EveryNBatches(u64),
    /// After approximately every N seconds since the last checkpoint.
    TimeInterval(u64),
}

/// One persisted snapshot.
#[derive(Debug, Serialize, Deserialize)]
#[cfg(feature = "checkpointing")]
pub struct CheckpointState {
    /// Caller-chosen job identifier; file names are derived from it.
    pub job_id: String,
    /// Prefix of the iterator that was saved.
    pub iterator_prefix: String,
    /// Milliseconds since epoch when the checkpoint was created.
    pub timestamp: u64,
    /// Iterator state entries.
    pub state: MemoryState,
    /// SHA-256 of the postcard-encoded `state`.
    pub checksum: String,
}

#[cfg(feature = "checkpointing")]
pub struct CheckpointManager {
    pub(crate) config: CheckpointConfig,
    pub last_checkpoint_time: Option<SystemTime>,
}

#[cfg(feature = "checkpointing")]
impl CheckpointManager {
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be created.
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        if config.enabled {
            create_dir_all(&config.directory).context("Failed to create checkpoint directory")?;
        }
        Ok(Self {
            config,
            last_checkpoint_time: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Whether a checkpoint is due after `batches_emitted` batches.
    pub fn should_checkpoint(&self, batches_emitted: u64) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.config.policy {
            CheckpointPolicy::Manual => false,
            CheckpointPolicy::EveryNBatches(n) => {
                n > 0 && batches_emitted > 0 && batches_emitted.is_multiple_of(n)
            }
            CheckpointPolicy::TimeInterval(secs) => {
                let now = SystemTime::now();
                self.last_checkpoint_time.is_none_or(|last| {
                    now.duration_since(last)
                        .is_ok_and(|elapsed| elapsed >= Duration::from_secs(secs))
                })
            }
        }
    }

    /// Snapshot `iterator` and persist it under `job_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator cannot be saved or the file cannot be written.
    pub fn save_iterator(&mut self, job_id: &str, iterator: &dyn DatasetIterator) -> Result<PathBuf> {
        let mut state = MemoryState::new();
        iterator.save(&mut state)?;
        let checkpoint = CheckpointState {
            job_id: job_id.to_string(),
            iterator_prefix: iterator.prefix().to_string(),
            timestamp: current_timestamp_ms(),
            checksum: state_checksum(&state)?,
            state,
        };
        self.save_checkpoint(&checkpoint)
    }

    /// Save a checkpoint to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be created or written to.
    pub fn save_checkpoint(&mut self, checkpoint: &CheckpointState) -> Result<PathBuf> {
        let filename = format!("checkpoint_{}_{}.bin", checkpoint.job_id, checkpoint.timestamp);
        let path = self.config.directory.join(&filename);

        let encoded = postcard::to_allocvec(checkpoint).context("Failed to serialize checkpoint")?;

        let mut file = File::create(&path).context("Failed to create checkpoint file")?;
        file.write_all(&encoded)
            .context("Failed to write checkpoint")?;
        file.sync_all()
            .context("Failed to sync checkpoint to disk")?;

        self.last_checkpoint_time = Some(SystemTime::now());
        tracing::debug!(path = %path.display(), entries = checkpoint.state.len(), "saved checkpoint");

        self.cleanup_old_checkpoints(&checkpoint.job_id)?;

        Ok(path)
    }

    /// Find the most recent checkpoint for a given job.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn find_latest_checkpoint(&self, job_id: &str) -> Result<Option<PathBuf>> {
        if !self.config.enabled || !self.config.directory.exists() {
            return Ok(None);
        }
        let checkpoints = self.list_checkpoints(job_id)?;
        Ok(checkpoints.last().map(DirEntry::path))
    }

    /// Load and verify a checkpoint from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded, or
    /// [`BatchError::CorruptCheckpoint`] if the checksum does not match.
    pub fn load_checkpoint(&self, path: &Path) -> Result<CheckpointState> {
        let mut file = File::open(path).context("Failed to open checkpoint file")?;
        let mut encoded = Vec::new();
        file.read_to_end(&mut encoded)
            .context("Failed to read checkpoint")?;

        let checkpoint: CheckpointState =
            postcard::from_bytes(&encoded).context("Failed to deserialize checkpoint")?;

        if state_checksum(&checkpoint.state)? != checkpoint.checksum {
            bail!(BatchError::CorruptCheckpoint(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        Ok(checkpoint)
    }

    /// Rebuild an iterator over `dataset` from the newest checkpoint of `job_id`,
    /// or start a fresh one if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be loaded or the iterator
    /// cannot be restored.
    pub fn restore_latest(
        &self,
        job_id: &str,
        dataset: Arc<dyn Dataset>,
        ctx: &IteratorContext,
        parent_prefix: &str,
    ) -> Result<Box<dyn DatasetIterator>> {
        let Some(path) = self.find_latest_checkpoint(job_id)? else {
            tracing::debug!(job_id, "no checkpoint found, starting fresh");
            return dataset.make_iterator(ctx, parent_prefix);
        };
        let checkpoint = self.load_checkpoint(&path)?;
        tracing::debug!(path = %path.display(), prefix = %checkpoint.iterator_prefix, "restoring from checkpoint");
        dataset.restore_iterator(ctx, parent_prefix, &checkpoint.state)
    }

    /// Delete all checkpoints for a given job.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn clear_checkpoints(&self, job_id: &str) -> Result<()> {
        for entry in self.list_checkpoints(job_id)? {
            remove_file(entry.path()).ok();
        }
        Ok(())
    }

    /// Delete old checkpoints beyond the retention limit.
    fn cleanup_old_checkpoints(&self, job_id: &str) -> Result<()> {
        let Some(max_checkpoints) = self.config.max_checkpoints else {
            return Ok(());
        };

        let checkpoints = self.list_checkpoints(job_id)?;
        if checkpoints.len() <= max_checkpoints {
            return Ok(());
        }

        let to_delete = checkpoints.len() - max_checkpoints;
        for entry in checkpoints.iter().take(to_delete) {
            remove_file(entry.path()).ok(); // Ignore errors
        }

        Ok(())
    }

    /// Checkpoint files of `job_id`, oldest first.
    fn list_checkpoints(&self, job_id: &str) -> Result<Vec<DirEntry>> {
        let prefix = format!("checkpoint_{job_id}_");
        let timestamp_of = |entry: &DirEntry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| {
                    name.strip_prefix(&prefix)
                        .and_then(|s| s.strip_suffix(".bin"))
                        .and_then(|s| s.parse::<u64>().ok())
                })
        };

        let mut checkpoints: Vec<_> = read_dir(&self.config.directory)
            .context("Failed to read checkpoint directory")?
            .filter_map(Result::ok)
            .filter(|entry| timestamp_of(entry).is_some())
            .collect();
        checkpoints.sort_by_key(|entry| timestamp_of(entry).unwrap_or(0));
        Ok(checkpoints)
    }
}

#[cfg(feature = "checkpointing")]
fn state_checksum(state: &MemoryState) -> Result<String> {
    let encoded = postcard::to_allocvec(state).context("Failed to serialize iterator state")?;
    Ok(compute_checksum(&encoded))
}

/// Compute SHA-256 checksum of data.
#[cfg(feature = "checkpointing")]
#[must_use]
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Get current timestamp in milliseconds since epoch.
#[cfg(feature = "checkpointing")]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
