use candle_core::{DType, Tensor, D};
use candle_nn::ops;
use layers::Graph;

use crate::error::{ModelError, Result};

/// Cross entropy averaged over the unmasked target positions.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// `logits (B, T, V)`, `targets (B, T)` of u32 ids, `mask (B, T)` of ones and zeros.
    ///
    /// The `(B·T, V)` log-probabilities and the per-token losses are accounted
    /// in `graph`.
    pub fn compute(
        &self,
        graph: &mut Graph,
        logits: &Tensor,
        targets: &Tensor,
        mask: &Tensor,
    ) -> Result<LossOutput> {
        let (rows, width, vocab_size) = logits.dims3()?;
        if targets.dims() != [rows, width] || mask.dims() != [rows, width] {
            return Err(ModelError::state(format!(
                "targets {:?} and mask {:?} must match logits {:?}",
                targets.dims(),
                mask.dims(),
                logits.dims()
            )));
        }
        let token_count = rows * width;
        let logits_flat = logits.reshape((token_count, vocab_size))?;
        let log_probs = graph.track(ops::log_softmax(&logits_flat, D::Minus1)?);

        let targets_flat = targets.reshape(token_count)?.to_dtype(DType::U32)?;
        let valid = mask.reshape(token_count)?.to_dtype(DType::F32)?;
        let total_tokens = valid.sum_all()?.to_vec0::<f32>()?.round() as usize;
        if total_tokens == 0 {
            return Err(ModelError::batch("no unmasked target tokens for the loss"));
        }

        let picked = graph.track(log_probs.gather(&targets_flat.unsqueeze(1)?, 1)?);
        let nll = graph.track(picked.squeeze(1)?.neg()?);
        let masked = graph.track(nll.mul(&valid)?);
        let loss = masked.sum_all()?.affine(1.0 / total_tokens as f64, 0.0)?;
        let average_loss = loss.to_vec0::<f32>()?;

        let correct_tokens = logits_flat
            .argmax(D::Minus1)?
            .eq(&targets_flat)?
            .to_dtype(DType::F32)?
            .mul(&valid)?
            .sum_all()?
            .to_vec0::<f32>()?
            .round() as usize;

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                average_loss,
                total_tokens,
                correct_tokens,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossMetrics {
    average_loss: f32,
    total_tokens: usize,
    correct_tokens: usize,
}

impl LossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn correct_tokens(&self) -> usize {
        self.correct_tokens
    }

    pub fn accuracy(&self) -> f32 {
        self.correct_tokens as f32 / self.total_tokens as f32
    }

    pub fn perplexity(&self) -> f32 {
        self.average_loss.exp()
    }
}
