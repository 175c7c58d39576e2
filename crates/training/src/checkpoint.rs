//! Training checkpoints.
//!
//! Every checkpoint is a `step_{:012}` directory under the configured base
//! holding the model archive, its configuration side file, `progress.json`
//! and a `manifest.json` that records a SHA-256 digest per file. Loading
//! refuses a directory whose files no longer match their digests.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use model::{config_side_path, Decoder, Encoder, EncoderDecoder};
use serde::{Deserialize, Serialize};

use crate::files::{read_json, sha256_bytes, sha256_file, write_json};
use crate::{TrainingConfig, TrainingError};

pub const CHECKPOINT_VERSION: u32 = 1;
const MODEL_FILENAME: &str = "model.npz";
const PROGRESS_FILENAME: &str = "progress.json";
const MANIFEST_FILENAME: &str = "manifest.json";
const DIR_PREFIX: &str = "step_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub sha256: String,
}

impl FileRecord {
    /// Digest of `name` inside `directory`.
    fn capture(directory: &Path, name: String) -> Result<Self, TrainingError> {
        let sha256 = sha256_file(&directory.join(&name))?;
        Ok(Self {
            filename: name,
            sha256,
        })
    }

    fn verify(&self, directory: &Path) -> Result<PathBuf, TrainingError> {
        let path = directory.join(&self.filename);
        if sha256_file(&path)? != self.sha256 {
            return Err(TrainingError::runtime(format!(
                "checkpoint file {} failed checksum validation",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Counters restored on resume.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TrainingProgressSnapshot {
    pub step: usize,
    pub epoch: usize,
    pub sentences: u64,
    pub words: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub version: u32,
    pub created_unix_timestamp: u64,
    pub config_sha256: String,
    pub step: usize,
    pub model: FileRecord,
    pub model_config: FileRecord,
    pub progress: FileRecord,
}

pub struct SaveRequest<'a, E: Encoder, D: Decoder> {
    pub base_dir: &'a Path,
    pub config: &'a TrainingConfig,
    pub model: &'a mut EncoderDecoder<E, D>,
    pub progress: TrainingProgressSnapshot,
    pub max_keep: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CheckpointDescriptor {
    pub directory: PathBuf,
    pub manifest: CheckpointManifest,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub manifest: CheckpointManifest,
    pub progress: TrainingProgressSnapshot,
    pub model_weights_path: PathBuf,
}

fn directory_for(base: &Path, step: usize) -> PathBuf {
    base.join(format!("{DIR_PREFIX}{step:012}"))
}

fn step_of(path: &Path) -> Option<usize> {
    path.file_name()?.to_str()?.strip_prefix(DIR_PREFIX)?.parse().ok()
}

pub fn save_checkpoint<E: Encoder, D: Decoder>(
    request: SaveRequest<'_, E, D>,
) -> Result<CheckpointDescriptor, TrainingError> {
    let step = request.progress.step;
    let directory = directory_for(request.base_dir, step);
    if directory.exists() {
        fs::remove_dir_all(&directory)?;
    }
    fs::create_dir_all(&directory)?;

    let model_path = directory.join(MODEL_FILENAME);
    request.model.save(&model_path, true)?;
    write_json(&directory.join(PROGRESS_FILENAME), &request.progress)?;

    let side_name = config_side_path(&model_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let manifest = CheckpointManifest {
        version: CHECKPOINT_VERSION,
        created_unix_timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default(),
        config_sha256: fingerprint_config(request.config)?,
        step,
        model: FileRecord::capture(&directory, MODEL_FILENAME.to_string())?,
        model_config: FileRecord::capture(&directory, side_name)?,
        progress: FileRecord::capture(&directory, PROGRESS_FILENAME.to_string())?,
    };
    write_json(&directory.join(MANIFEST_FILENAME), &manifest)?;
    log::info!("saved checkpoint {}", directory.display());

    if let Some(limit) = request.max_keep.filter(|limit| *limit > 0) {
        prune_checkpoints(request.base_dir, limit)?;
    }
    Ok(CheckpointDescriptor {
        directory,
        manifest,
    })
}

/// Checkpoint directories under `base`, oldest step first.
fn checkpoints_by_step(base: &Path) -> Result<Vec<(usize, PathBuf)>, TrainingError> {
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if let Some(step) = step_of(&path).filter(|_| path.is_dir()) {
            found.push((step, path));
        }
    }
    found.sort();
    Ok(found)
}

pub fn latest_checkpoint(base_dir: &Path) -> Result<Option<CheckpointDescriptor>, TrainingError> {
    let Some((_, directory)) = checkpoints_by_step(base_dir)?.pop() else {
        return Ok(None);
    };
    let manifest = read_json(&directory.join(MANIFEST_FILENAME))?;
    Ok(Some(CheckpointDescriptor {
        directory,
        manifest,
    }))
}

/// Verifies every recorded file against its digest before reading it.
pub fn load_checkpoint(directory: &Path) -> Result<LoadOutcome, TrainingError> {
    let manifest: CheckpointManifest = read_json(&directory.join(MANIFEST_FILENAME))?;
    if manifest.version != CHECKPOINT_VERSION {
        return Err(TrainingError::runtime(format!(
            "checkpoint {} has version {}, this build reads version {CHECKPOINT_VERSION}",
            directory.display(),
            manifest.version
        )));
    }
    let model_weights_path = manifest.model.verify(directory)?;
    manifest.model_config.verify(directory)?;
    let progress = read_json(&manifest.progress.verify(directory)?)?;
    Ok(LoadOutcome {
        manifest,
        progress,
        model_weights_path,
    })
}

/// Digest of the serialized training configuration.
pub fn fingerprint_config(config: &TrainingConfig) -> Result<String, TrainingError> {
    let json = serde_json::to_vec(config)
        .map_err(|err| TrainingError::runtime(format!("failed to hash config: {err}")))?;
    Ok(sha256_bytes(&json))
}

/// Deletes all but the `keep` most recent checkpoints.
pub fn prune_checkpoints(base: &Path, keep: usize) -> Result<(), TrainingError> {
    let checkpoints = checkpoints_by_step(base)?;
    let excess = checkpoints.len().saturating_sub(keep);
    for (_, directory) in checkpoints.into_iter().take(excess) {
        fs::remove_dir_all(&directory)?;
        log::debug!("pruned checkpoint {}", directory.display());
    }
    Ok(())
}
