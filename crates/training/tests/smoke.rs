mod common;

use model::{AttentionDecoder, BidirectionalEncoder, Nematus, PlainDecoder, RecurrentEncoder};
use tempfile::tempdir;
use training::{checkpoint, Trainer, TrainingError};

#[test]
fn smoke_training_checkpoint_resume() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let config = common::write_fixture(
        tmp.path(),
        r#"
[runtime.checkpoint]
directory = "checkpoints"
every_n_steps = 2
max_keep = 2
"#,
    )?;
    let checkpoints = tmp.path().join("checkpoints");
    assert_eq!(config.runtime.checkpoint.as_ref().map(|c| c.directory.clone()), Some(checkpoints.clone()));

    let mut trainer = Trainer::<BidirectionalEncoder, AttentionDecoder>::new(config.clone())?;
    assert!(trainer.stats().is_none());
    trainer.train()?;
    // 12 sentences in batches of 4, two epochs.
    assert_eq!(trainer.progress().step, 6);
    assert_eq!(trainer.progress().epoch, 2);
    assert_eq!(trainer.progress().sentences, 24);

    let mut kept: Vec<_> = std::fs::read_dir(&checkpoints)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    kept.sort();
    assert_eq!(kept, vec!["step_000000000004", "step_000000000006"]);

    let latest = checkpoint::latest_checkpoint(&checkpoints)?.expect("checkpoint");
    assert_eq!(latest.manifest.step, 6);
    let weights = latest.directory.join("model.npz");
    let restored_config = Nematus::load_config(&weights)?.expect("side file");
    assert_eq!(&restored_config, trainer.model().config());

    let mut resumed = Trainer::<BidirectionalEncoder, AttentionDecoder>::new(config)?;
    let descriptor = resumed.resume_from_latest()?.expect("resumed");
    assert_eq!(descriptor.directory, latest.directory);
    assert_eq!(resumed.progress(), trainer.progress());
    resumed.train()?;
    assert_eq!(resumed.progress().step, 6);
    Ok(())
}

#[test]
fn stop_request_ends_training_early() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let config = common::write_fixture(tmp.path(), "")?;
    let mut trainer = Trainer::<RecurrentEncoder, PlainDecoder>::new(config)?;
    let mut polls = 0;
    trainer.train_with_shutdown(|| {
        polls += 1;
        polls > 2
    })?;
    assert_eq!(trainer.progress().step, 2);
    Ok(())
}

#[test]
fn dynamic_batching_probes_in_the_background_and_caches() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let config = common::write_fixture(
        tmp.path(),
        r#"
[batching]
dynamic = true
probe_step = 5
probe_max_length = 10
probe_max_batch = 20
workspace_mb = 4
probe_in_background = true
stats_cache = "stats.json"

[runtime.checkpoint]
directory = "checkpoints"
every_n_steps = 100
"#,
    )?;
    let cache = tmp.path().join("stats.json");

    let mut trainer = Trainer::<BidirectionalEncoder, AttentionDecoder>::new(config.clone())?;
    trainer.train()?;
    let stats = trainer.stats().expect("capacity table").clone();
    assert!(!stats.is_empty());
    assert!(stats.max_batch_size(&[6, 6]).is_some());
    assert!(cache.is_file());
    assert!(trainer.progress().step > 0);

    let cached = Trainer::<BidirectionalEncoder, AttentionDecoder>::new(config)?;
    assert_eq!(cached.stats(), Some(&stats));
    Ok(())
}

#[test]
fn batches_beyond_the_workspace_are_fatal() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let mut config = common::write_fixture(tmp.path(), "")?;
    config.model.config.dim_vocabs = vec![20, 40_000];
    config.batching.workspace_mb = Some(1);

    let mut trainer = Trainer::<BidirectionalEncoder, AttentionDecoder>::new(config)?;
    let err = trainer.train().unwrap_err();
    assert!(matches!(err, TrainingError::Capacity(_)), "{err}");
    assert_eq!(trainer.progress().step, 0);
    Ok(())
}
