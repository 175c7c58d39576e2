use std::time::{Duration, Instant};

use model::LossMetrics;

#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let v = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(v);
        v
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

#[derive(Debug)]
pub struct TrainingMetrics {
    step_timer: Instant,
    start_time: Instant,
    words_processed: u64,
    sentences_processed: u64,
    loss_ema: ExponentialMovingAverage,
    accuracy_ema: ExponentialMovingAverage,
    throughput_ema: ExponentialMovingAverage,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            step_timer: now,
            start_time: now,
            words_processed: 0,
            sentences_processed: 0,
            loss_ema: ExponentialMovingAverage::new(0.1),
            accuracy_ema: ExponentialMovingAverage::new(0.1),
            throughput_ema: ExponentialMovingAverage::new(0.1),
        }
    }

    pub fn record_step(&mut self, sentences: usize, loss: &LossMetrics) -> StepSnapshot {
        let now = Instant::now();
        let step_duration = now.duration_since(self.step_timer);
        self.step_timer = now;

        let words = loss.total_tokens() as u64;
        self.words_processed = self.words_processed.saturating_add(words);
        self.sentences_processed = self.sentences_processed.saturating_add(sentences as u64);
        let step_words_per_sec = if step_duration > Duration::ZERO {
            words as f64 / step_duration.as_secs_f64()
        } else {
            0.0
        };
        let step_loss = loss.average_loss() as f64;

        StepSnapshot {
            loss: self.loss_ema.update(step_loss),
            step_loss,
            accuracy: self.accuracy_ema.update(loss.accuracy() as f64),
            words,
            words_per_sec: self.throughput_ema.update(step_words_per_sec),
            total_words: self.words_processed,
            total_sentences: self.sentences_processed,
            wall_time: now.duration_since(self.start_time),
            step_duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepSnapshot {
    /// Smoothed loss.
    pub loss: f64,
    pub step_loss: f64,
    pub accuracy: f64,
    pub words: u64,
    pub words_per_sec: f64,
    pub total_words: u64,
    pub total_sentences: u64,
    pub wall_time: Duration,
    pub step_duration: Duration,
}

impl StepSnapshot {
    pub fn perplexity(&self) -> f64 {
        self.loss.exp()
    }
}
