use std::sync::Arc;

use candle_core::Device;
use layers::Graph;
use model::{CorpusBatch, Decoder, Encoder, EncoderDecoder};

use crate::{
    checkpoint::{self, CheckpointDescriptor, SaveRequest, TrainingProgressSnapshot},
    config::CheckpointConfig,
    data::{read_corpus, BatchGenerator},
    metrics::{StepSnapshot, TrainingMetrics},
    optimizer::TrainerOptimizer,
    prober::{collect_stats, spawn_collect_stats, ProbeHandle, ProbeSettings},
    stats::BatchStats,
    TrainingConfig, TrainingError,
};

/// Where the capacity table comes from.
enum StatsSource {
    Disabled,
    Ready(Arc<BatchStats>),
    Pending(ProbeHandle),
}

/// Drives one coordinator over the training corpus.
pub struct Trainer<E: Encoder, D: Decoder> {
    config: TrainingConfig,
    device: Device,
    model: EncoderDecoder<E, D>,
    optimizer: TrainerOptimizer,
    batches: BatchGenerator,
    stats: StatsSource,
    metrics: TrainingMetrics,
    progress: TrainingProgressSnapshot,
    log_every: usize,
    checkpoint: Option<CheckpointConfig>,
}

impl<E, D> Trainer<E, D>
where
    E: Encoder + 'static,
    D: Decoder + 'static,
{
    pub fn new(config: TrainingConfig) -> Result<Self, TrainingError> {
        config.validate()?;

        let device = config.runtime.device.resolve()?;
        log::info!(
            "device selected: is_cuda={} is_cpu={}",
            device.is_cuda(),
            device.is_cpu()
        );

        let corpus = read_corpus(&config.data.train_sets)?;
        let batches = BatchGenerator::new(corpus, &config.data, config.runtime.seed)?;
        log::info!(
            "corpus ready ({} sentence tuples, {} streams)",
            batches.sentences(),
            config.data.train_sets.len()
        );

        let stats = Self::start_stats(&config, &device)?;

        let mut model: EncoderDecoder<E, D> =
            EncoderDecoder::new(config.model.config.clone(), build_graph(&config, &device))?;
        model.initialize_parameters()?;
        log::info!(
            "model has {} parameter tensors ({} bytes)",
            model.graph().parameter_count(),
            model.graph().parameter_bytes()
        );

        let optimizer = TrainerOptimizer::new(model.graph().vars(), &config.optimizer)?;

        let progress = TrainingProgressSnapshot {
            seed: config.runtime.seed,
            ..TrainingProgressSnapshot::default()
        };
        let log_every = config.runtime.log_every_n_steps.max(1);
        let checkpoint = config.runtime.checkpoint.clone();

        Ok(Self {
            config,
            device,
            model,
            optimizer,
            batches,
            stats,
            metrics: TrainingMetrics::new(),
            progress,
            log_every,
            checkpoint,
        })
    }

    /// Loads the cached table, probes on this thread, or starts a probing
    /// thread over a separate coordinator.
    fn start_stats(config: &TrainingConfig, device: &Device) -> Result<StatsSource, TrainingError> {
        if !config.batching.dynamic {
            return Ok(StatsSource::Disabled);
        }
        if let Some(cache) = &config.batching.stats_cache {
            if cache.is_file() {
                let stats = BatchStats::load(cache)?;
                log::info!(
                    "[batching] loaded {} capacity entries from {}",
                    stats.len(),
                    cache.display()
                );
                return Ok(StatsSource::Ready(Arc::new(stats)));
            }
        }

        let settings = ProbeSettings::from_config(&config.batching, config.data.train_sets.len());
        let probe: EncoderDecoder<E, D> =
            EncoderDecoder::new(config.model.config.clone(), build_graph(config, device))?;
        if config.batching.probe_in_background {
            log::info!("[batching] collecting statistics in the background");
            return Ok(StatsSource::Pending(spawn_collect_stats(probe, settings)?));
        }
        let mut probe = probe;
        let stats = collect_stats(&mut probe, &settings)?;
        Self::publish_stats(config, stats)
    }

    fn publish_stats(config: &TrainingConfig, stats: BatchStats) -> Result<StatsSource, TrainingError> {
        if let Some(cache) = &config.batching.stats_cache {
            stats.save(cache)?;
        }
        Ok(StatsSource::Ready(Arc::new(stats)))
    }

    /// Waits for a background probe and hands the table to the batch generator.
    fn ensure_stats(&mut self) -> Result<(), TrainingError> {
        let source = std::mem::replace(&mut self.stats, StatsSource::Disabled);
        self.stats = match source {
            StatsSource::Pending(handle) => {
                let stats = handle.join()?;
                log::info!("[batching] background statistics ready");
                Self::publish_stats(&self.config, stats)?
            }
            other => other,
        };
        if let StatsSource::Ready(stats) = &self.stats {
            self.batches.set_stats(Arc::clone(stats));
        }
        Ok(())
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model(&self) -> &EncoderDecoder<E, D> {
        &self.model
    }

    pub fn progress(&self) -> &TrainingProgressSnapshot {
        &self.progress
    }

    /// The capacity table once it is available.
    pub fn stats(&self) -> Option<&BatchStats> {
        match &self.stats {
            StatsSource::Ready(stats) => Some(stats.as_ref()),
            _ => None,
        }
    }

    pub fn resume_from_latest(&mut self) -> Result<Option<CheckpointDescriptor>, TrainingError> {
        let Some(settings) = &self.checkpoint else {
            return Ok(None);
        };
        let Some(descriptor) = checkpoint::latest_checkpoint(&settings.directory)? else {
            return Ok(None);
        };
        log::info!(
            "resuming from checkpoint {} (step {})",
            descriptor.directory.display(),
            descriptor.manifest.step
        );
        let outcome = checkpoint::load_checkpoint(&descriptor.directory)?;
        if outcome.manifest.config_sha256 != checkpoint::fingerprint_config(&self.config)? {
            log::warn!("checkpoint was written with a different training configuration");
        }
        self.model.load(&outcome.model_weights_path)?;
        self.progress = outcome.progress;
        Ok(Some(descriptor))
    }

    /// One optimizer update on `batch`.
    ///
    /// A batch that does not fit the workspace is fatal; batches are never
    /// split or retried.
    pub fn update(&mut self, batch: &CorpusBatch) -> Result<StepSnapshot, TrainingError> {
        let output = self.model.build_with_metrics(batch)?;
        self.model.ensure_fits(batch)?;
        self.optimizer.backward_step(&output.loss)?;

        let snapshot = self.metrics.record_step(batch.size(), &output.metrics);
        self.progress.step += 1;
        self.progress.sentences += batch.size() as u64;
        self.progress.words += snapshot.words;

        if self.progress.step % self.log_every == 0 {
            log::info!(
                "epoch {} step {}: loss={:.4} ppl={:.2} acc={:.3} words/s={:.0} sentences={}",
                self.progress.epoch,
                self.progress.step,
                snapshot.loss,
                snapshot.perplexity(),
                snapshot.accuracy,
                snapshot.words_per_sec,
                self.progress.sentences
            );
        }

        if let Some(every) = self.checkpoint.as_ref().map(|c| c.every_n_steps) {
            if self.progress.step % every == 0 {
                self.save_checkpoint()?;
            }
        }
        Ok(snapshot)
    }

    pub fn train(&mut self) -> Result<(), TrainingError> {
        self.train_with_shutdown(|| false)
    }

    /// Runs the remaining epochs; a resumed run restarts its interrupted epoch.
    pub fn train_with_shutdown<F>(&mut self, mut should_stop: F) -> Result<(), TrainingError>
    where
        F: FnMut() -> bool,
    {
        self.ensure_stats()?;
        log::info!(
            "starting training on {:?} (epochs={}, step={})",
            self.device,
            self.config.runtime.epochs,
            self.progress.step
        );

        while self.progress.epoch < self.config.runtime.epochs {
            self.batches.prepare(self.config.data.shuffle)?;
            log::info!(
                "epoch {} with {} batches",
                self.progress.epoch,
                self.batches.remaining()
            );
            while let Some(batch) = self.batches.next() {
                if should_stop() {
                    log::info!("stop requested at step {}", self.progress.step);
                    if self.checkpoint.is_some() {
                        self.save_checkpoint()?;
                    }
                    return Ok(());
                }
                self.update(&batch)?;
            }
            self.progress.epoch += 1;
        }

        log::info!("training finished after {} steps", self.progress.step);
        if self.checkpoint.is_some() {
            self.save_checkpoint()?;
        }
        if let Some(output) = self.config.runtime.output.clone() {
            self.model.save(&output, true)?;
        }
        Ok(())
    }

    pub fn save_checkpoint(&mut self) -> Result<Option<CheckpointDescriptor>, TrainingError> {
        let Some(settings) = self.checkpoint.clone() else {
            return Ok(None);
        };
        let descriptor = checkpoint::save_checkpoint(SaveRequest {
            base_dir: &settings.directory,
            config: &self.config,
            model: &mut self.model,
            progress: self.progress.clone(),
            max_keep: settings.max_keep,
        })?;
        Ok(Some(descriptor))
    }
}

fn build_graph(config: &TrainingConfig, device: &Device) -> Graph {
    let graph = Graph::new(device.clone(), config.model.config.seed);
    match config.batching.workspace_mb {
        Some(megabytes) => graph.with_workspace_mb(megabytes),
        None => graph,
    }
}
