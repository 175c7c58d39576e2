//! Batch-capacity probing.
//!
//! For every length bucket `step, 2·step, … ≤ max_length` the prober builds
//! synthetic batches of `step, 2·step, …` sentences and records each size
//! that fits the workspace. The inner loop stops at the first failing trial,
//! which never reaches the table: capacity is assumed to be non-increasing in
//! length and in batch size.

use std::thread::{self, JoinHandle};

use model::{CorpusBatch, Decoder, Encoder, EncoderDecoder};

use crate::{config::BatchingConfig, stats::BatchStats, TrainingError};

/// Something that can build a batch and report whether it fit.
pub trait CapacityProbe {
    fn trial(&mut self, batch: &CorpusBatch) -> Result<bool, TrainingError>;

    /// Called once after the sweep.
    fn release(&mut self) -> Result<(), TrainingError> {
        Ok(())
    }
}

impl<E: Encoder, D: Decoder> CapacityProbe for EncoderDecoder<E, D> {
    fn trial(&mut self, batch: &CorpusBatch) -> Result<bool, TrainingError> {
        self.build(batch)?;
        Ok(self.fits())
    }

    fn release(&mut self) -> Result<(), TrainingError> {
        self.clear_parameters()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub step: usize,
    pub max_length: usize,
    pub max_batch_size: usize,
    pub streams: usize,
}

impl ProbeSettings {
    pub fn from_config(config: &BatchingConfig, streams: usize) -> Self {
        Self {
            step: config.probe_step,
            max_length: config.probe_max_length,
            max_batch_size: config.probe_max_batch,
            streams,
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();
        if self.step == 0 {
            errors.push("probe step must be greater than 0".to_string());
        }
        if self.streams == 0 {
            errors.push("probe needs at least one stream".to_string());
        }
        if self.max_length < self.step {
            errors.push(format!(
                "probe max length {} is below the step {}",
                self.max_length, self.step
            ));
        }
        if self.max_batch_size < self.step {
            errors.push(format!(
                "probe max batch size {} is below the step {}",
                self.max_batch_size, self.step
            ));
        }
        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }
}

/// Runs the sweep on the calling thread.
pub fn collect_stats<P: CapacityProbe + ?Sized>(
    probe: &mut P,
    settings: &ProbeSettings,
) -> Result<BatchStats, TrainingError> {
    settings.validate()?;
    log::info!(
        "[batching] collecting statistics (step={} max_length={} max_batch={})",
        settings.step,
        settings.max_length,
        settings.max_batch_size
    );

    let mut stats = BatchStats::new();
    for length in (settings.step..=settings.max_length).step_by(settings.step) {
        let lengths = vec![length; settings.streams];
        let mut largest = None;
        for batch_size in (settings.step..=settings.max_batch_size).step_by(settings.step) {
            let batch = CorpusBatch::fake(&lengths, batch_size)?;
            let fits = probe.trial(&batch)?;
            log::debug!("[batching] length={length} batch={batch_size} fits={fits}");
            if !fits {
                break;
            }
            stats.add(&batch);
            largest = Some(batch_size);
        }
        match largest {
            Some(size) => log::info!("[batching] length={length} max batch={size}"),
            None => log::warn!("[batching] length={length} does not fit a batch of {}", settings.step),
        }
    }

    probe.release()?;
    log::info!("[batching] done, {} entries", stats.len());
    Ok(stats)
}

/// Sweep running on a dedicated thread; the table is published once, on join.
#[derive(Debug)]
pub struct ProbeHandle {
    inner: JoinHandle<Result<BatchStats, TrainingError>>,
}

impl ProbeHandle {
    pub fn join(self) -> Result<BatchStats, TrainingError> {
        self.inner
            .join()
            .map_err(|_| TrainingError::runtime("batch statistics thread panicked"))?
    }
}

/// Moves `probe` to a `batch-stats` thread and starts the sweep there.
pub fn spawn_collect_stats<P>(mut probe: P, settings: ProbeSettings) -> Result<ProbeHandle, TrainingError>
where
    P: CapacityProbe + Send + 'static,
{
    settings.validate()?;
    let inner = thread::Builder::new()
        .name("batch-stats".to_string())
        .spawn(move || collect_stats(&mut probe, &settings))?;
    Ok(ProbeHandle { inner })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Budget {
        tokens: usize,
        trials: usize,
        released: bool,
    }

    impl CapacityProbe for Budget {
        fn trial(&mut self, batch: &CorpusBatch) -> Result<bool, TrainingError> {
            self.trials += 1;
            Ok(batch.size() * batch.widths()[0] <= self.tokens)
        }

        fn release(&mut self) -> Result<(), TrainingError> {
            self.released = true;
            Ok(())
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            step: 10,
            max_length: 30,
            max_batch_size: 1024,
            streams: 2,
        }
    }

    #[test]
    fn records_the_last_fitting_size_per_length() -> Result<(), TrainingError> {
        let mut probe = Budget {
            tokens: 1200,
            trials: 0,
            released: false,
        };
        let stats = collect_stats(&mut probe, &settings())?;
        assert_eq!(stats.max_batch_size(&[10, 10]), Some(120));
        assert_eq!(stats.max_batch_size(&[20, 20]), Some(60));
        assert_eq!(stats.max_batch_size(&[30, 30]), Some(40));
        // 13 + 7 + 5 trials, each loop ending on its first failure.
        assert_eq!(probe.trials, 25);
        assert!(probe.released);
        Ok(())
    }

    #[test]
    fn max_batch_size_bounds_the_sweep() -> Result<(), TrainingError> {
        let mut probe = Budget {
            tokens: usize::MAX,
            trials: 0,
            released: false,
        };
        let settings = ProbeSettings {
            max_batch_size: 50,
            ..settings()
        };
        let stats = collect_stats(&mut probe, &settings)?;
        assert_eq!(stats.max_batch_size(&[30, 30]), Some(50));
        assert_eq!(probe.trials, 15);
        Ok(())
    }

    #[test]
    fn nothing_fits_gives_an_empty_table() -> Result<(), TrainingError> {
        let mut probe = Budget {
            tokens: 1,
            trials: 0,
            released: false,
        };
        let stats = collect_stats(&mut probe, &settings())?;
        assert!(stats.is_empty());
        assert_eq!(probe.trials, 3);
        Ok(())
    }

    #[test]
    fn background_sweep_publishes_on_join() -> Result<(), TrainingError> {
        let probe = Budget {
            tokens: 600,
            trials: 0,
            released: false,
        };
        let stats = spawn_collect_stats(probe, settings())?.join()?;
        assert_eq!(stats.max_batch_size(&[20, 20]), Some(30));
        Ok(())
    }

    #[test]
    fn zero_step_is_rejected() {
        let mut probe = Budget {
            tokens: 1,
            trials: 0,
            released: false,
        };
        let settings = ProbeSettings {
            step: 0,
            ..settings()
        };
        assert!(matches!(
            collect_stats(&mut probe, &settings),
            Err(TrainingError::Validation(_))
        ));
    }
}
