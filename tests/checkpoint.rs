//! Tests for iterator save/restore and the checkpoint module.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tensor_batch::batch::INPUT_IMPL_EMPTY;
use tensor_batch::state::full_name;
use tensor_batch::testing::*;
use tensor_batch::*;

fn range_spec(n: i64, batch_size: i64, drop_remainder: bool) -> Result<Arc<BatchSpec>> {
    Ok(Arc::new(BatchSpec::new(
        Arc::new(RangeDataset::new(0, n)),
        batch_size,
        drop_remainder,
        false,
    )?))
}

#[test]
fn restore_mid_stream_reproduces_remaining_output() -> Result<()> {
    let ctx = IteratorContext::default();
    let spec = range_spec(20, 3, false)?;
    let original = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
    take(original.as_ref(), &ctx, 2)?;

    let mut state = MemoryState::new();
    original.save(&mut state)?;
    assert!(!state.contains(&full_name("Iterator::BatchV2", INPUT_IMPL_EMPTY)));

    let expected = drain(original.as_ref(), &ctx)?;
    let restored = spec.restore_iterator(&ctx, "Iterator", &state)?;
    let got = drain(restored.as_ref(), &ctx)?;

    assert_batches_identical(&got, &expected);
    assert_eq!(
        batch_values::<i64>(&got, 0)?,
        vec![
            vec![6, 7, 8],
            vec![9, 10, 11],
            vec![12, 13, 14],
            vec![15, 16, 17],
            vec![18, 19]
        ]
    );
    Ok(())
}

#[test]
fn drained_checkpoint_writes_marker_and_skips_upstream() -> Result<()> {
    let ctx = IteratorContext::default();
    let counting = CountingDataset::new(Arc::new(RangeDataset::new(0, 4)));
    let pulls = counting.pulls();
    let spec = Arc::new(BatchSpec::new(Arc::new(counting), 3, false, false)?);

    let original = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
    drain(original.as_ref(), &ctx)?;
    let mut state = MemoryState::new();
    original.save(&mut state)?;
    assert_eq!(
        state.keys().collect::<Vec<_>>(),
        vec!["Iterator::BatchV2:input_impl_empty"]
    );

    let before = pulls.load(Ordering::SeqCst);
    let restored = spec.restore_iterator(&ctx, "Iterator", &state)?;
    assert!(restored.get_next(&ctx)?.is_none());
    assert!(restored.get_next(&ctx)?.is_none());
    assert_eq!(pulls.load(Ordering::SeqCst), before);
    Ok(())
}

#[test]
fn dropped_remainder_checkpoints_as_drained() -> Result<()> {
    let ctx = IteratorContext::default();
    let spec = range_spec(7, 3, true)?;
    let it = Arc::clone(&spec).restore_batch_iterator(&ctx, "Iterator", &MemoryState::new());
    // Restoring from an empty store fails: the upstream position is missing.
    assert!(it.is_err());

    let it = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
    assert_eq!(drain(it.as_ref(), &ctx)?.len(), 2);
    let mut state = MemoryState::new();
    it.save(&mut state)?;

    let restored = spec.restore_batch_iterator(&ctx, "Iterator", &state)?;
    assert!(restored.is_drained()?);
    Ok(())
}

#[test]
fn restore_in_place_replaces_the_cursor() -> Result<()> {
    let ctx = IteratorContext::default();
    let spec = range_spec(10, 4, false)?;

    let first = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
    take(first.as_ref(), &ctx, 1)?;
    let mut state = MemoryState::new();
    first.save(&mut state)?;

    let second = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
    second.restore(&ctx, &state)?;
    assert_eq!(
        batch_values::<i64>(&drain(second.as_ref(), &ctx)?, 0)?,
        vec![vec![4, 5, 6, 7], vec![8, 9]]
    );

    // A drained snapshot switches an active iterator to drained.
    let mut drained = MemoryState::new();
    second.save(&mut drained)?;
    let third = spec.make_iterator(&ctx, "Iterator")?;
    third.restore(&ctx, &drained)?;
    assert!(third.get_next(&ctx)?.is_none());
    Ok(())
}

#[test]
fn nested_stages_checkpoint_through_each_other() -> Result<()> {
    let ctx = IteratorContext::default();
    let inner = BatchSpec::new(Arc::new(RangeDataset::new(0, 30)), 2, false, false)?
        .with_op_version(OpVersion::V1);
    let outer = Arc::new(BatchSpec::new(Arc::new(inner), 3, false, false)?);

    let it = Arc::clone(&outer).make_iterator(&ctx, "Iterator")?;
    take(it.as_ref(), &ctx, 2)?;
    let mut state = MemoryState::new();
    it.save(&mut state)?;
    assert_eq!(
        state.keys().collect::<Vec<_>>(),
        vec!["Iterator::BatchV2::Batch::Range:next"]
    );

    let expected = drain(it.as_ref(), &ctx)?;
    let restored = outer.restore_iterator(&ctx, "Iterator", &state)?;
    assert_batches_identical(&drain(restored.as_ref(), &ctx)?, &expected);
    Ok(())
}

#[test]
fn v1_stage_uses_unversioned_marker_key() -> Result<()> {
    let ctx = IteratorContext::default();
    let spec = Arc::new(
        BatchSpec::new(Arc::new(RangeDataset::new(0, 2)), 5, false, false)?
            .with_op_version(OpVersion::V1),
    );
    let it = spec.make_iterator(&ctx, "Iterator")?;
    drain(it.as_ref(), &ctx)?;
    let mut state = MemoryState::new();
    it.save(&mut state)?;
    assert!(state.contains("Iterator::Batch:input_impl_empty"));
    Ok(())
}

#[cfg(feature = "checkpointing")]
mod checkpoint_tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tensor_batch::checkpoint::{CheckpointState, compute_checksum};

    fn manager(tmp: &TempDir, max_checkpoints: Option<usize>) -> Result<CheckpointManager> {
        CheckpointManager::new(CheckpointConfig {
            enabled: true,
            directory: tmp.path().to_path_buf(),
            max_checkpoints,
            ..Default::default()
        })
    }

    #[test]
    fn test_checkpoint_config_default() {
        let config = CheckpointConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.policy, CheckpointPolicy::Manual);
        assert_eq!(config.max_checkpoints, Some(10));
    }

    #[test]
    fn test_should_checkpoint_policies() -> Result<()> {
        let tmp = TempDir::new()?;

        let manager = CheckpointManager::new(CheckpointConfig {
            enabled: true,
            directory: tmp.path().to_path_buf(),
            policy: CheckpointPolicy::EveryNBatches(3),
            ..Default::default()
        })?;
        assert!(!manager.should_checkpoint(0));
        assert!(!manager.should_checkpoint(2));
        assert!(manager.should_checkpoint(3));
        assert!(manager.should_checkpoint(6));

        let manager = CheckpointManager::new(CheckpointConfig {
            enabled: true,
            directory: tmp.path().to_path_buf(),
            policy: CheckpointPolicy::TimeInterval(3600),
            ..Default::default()
        })?;
        assert!(manager.should_checkpoint(1));

        let disabled = CheckpointManager::new(CheckpointConfig {
            policy: CheckpointPolicy::EveryNBatches(1),
            ..Default::default()
        })?;
        assert!(!disabled.should_checkpoint(1));
        Ok(())
    }

    #[test]
    fn test_save_and_restore_latest() -> Result<()> {
        let tmp = TempDir::new()?;
        let mut manager = manager(&tmp, None)?;
        let ctx = IteratorContext::default();
        let spec = range_spec(11, 2, true)?;

        assert!(manager.find_latest_checkpoint("job")?.is_none());

        let it = Arc::clone(&spec).make_iterator(&ctx, "Iterator")?;
        take(it.as_ref(), &ctx, 1)?;
        manager.save_iterator("job", it.as_ref())?;
        std::thread::sleep(Duration::from_millis(10));
        take(it.as_ref(), &ctx, 1)?;
        let latest = manager.save_iterator("job", it.as_ref())?;
        assert!(latest.exists());
        assert!(!manager.should_checkpoint(5));

        let expected = drain(it.as_ref(), &ctx)?;
        let resumed = manager.restore_latest("job", spec, &ctx, "Iterator")?;
        let got = drain(resumed.as_ref(), &ctx)?;
        assert_batches_identical(&got, &expected);
        assert_eq!(batch_values::<i64>(&got, 0)?, vec![vec![4, 5], vec![6, 7], vec![8, 9]]);

        let loaded = manager.load_checkpoint(&latest)?;
        assert_eq!(loaded.job_id, "job");
        assert_eq!(loaded.iterator_prefix, "Iterator::BatchV2");
        Ok(())
    }

    #[test]
    fn test_restore_latest_without_checkpoint_starts_fresh() -> Result<()> {
        let tmp = TempDir::new()?;
        let manager = manager(&tmp, None)?;
        let ctx = IteratorContext::default();

        let it = manager.restore_latest("nothing", range_spec(3, 2, false)?, &ctx, "Iterator")?;
        assert_eq!(batch_values::<i64>(&drain(it.as_ref(), &ctx)?, 0)?, vec![vec![0, 1], vec![2]]);
        Ok(())
    }

    #[test]
    fn test_cleanup_old_checkpoints() -> Result<()> {
        let tmp = TempDir::new()?;
        let mut manager = manager(&tmp, Some(2))?;
        let ctx = IteratorContext::default();
        let it = range_spec(100, 5, false)?.make_iterator(&ctx, "Iterator")?;

        for _ in 0..4 {
            take(it.as_ref(), &ctx, 1)?;
            manager.save_iterator("job", it.as_ref())?;
            std::thread::sleep(Duration::from_millis(10));
        }

        let checkpoints: Vec<_> = fs::read_dir(tmp.path())?.filter_map(|e| e.ok()).collect();
        assert_eq!(checkpoints.len(), 2);

        manager.clear_checkpoints("job")?;
        assert!(manager.find_latest_checkpoint("job")?.is_none());
        Ok(())
    }

    #[test]
    fn test_checksum_verification() -> Result<()> {
        let tmp = TempDir::new()?;
        let mut manager = manager(&tmp, None)?;
        let ctx = IteratorContext::default();
        let it = range_spec(10, 3, false)?.make_iterator(&ctx, "Iterator")?;
        take(it.as_ref(), &ctx, 1)?;
        let path = manager.save_iterator("job", it.as_ref())?;

        // Move the saved position without updating the checksum.
        let mut checkpoint: CheckpointState = postcard::from_bytes(&fs::read(&path)?)?;
        checkpoint
            .state
            .write_scalar("Iterator::BatchV2::Range:next", StateValue::Int(9))?;
        fs::write(&path, postcard::to_allocvec(&checkpoint)?)?;

        let err = manager.load_checkpoint(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BatchError>(),
            Some(BatchError::CorruptCheckpoint(_))
        ));
        Ok(())
    }

    #[test]
    fn test_compute_checksum_is_sha256_hex() {
        assert_eq!(
            compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
