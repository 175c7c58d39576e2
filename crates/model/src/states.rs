//! Encoder and decoder states threaded through a decoding pass.

use std::sync::Arc;

use candle_core::{Tensor, D};
use layers::{checks, Graph};

use crate::error::{ModelError, Result};

/// Encoder output for one batch: context, validity mask and additive mask.
///
/// Built once per batch and shared read-only by every decoding step.
#[derive(Debug, Clone)]
pub struct EncoderState {
    context: Tensor,
    mask: Tensor,
    attention_mask: Tensor,
}

impl EncoderState {
    /// `context (B, C, T)`, `mask (B, 1, T)` of ones and zeros and
    /// `attention_mask (B, T)` of zeros and negative infinity.
    pub fn new(context: Tensor, mask: Tensor, attention_mask: Tensor) -> Result<Self> {
        let (batch, _, width) = context.dims3()?;
        checks::expect_shape("encoder.mask", &mask, &[batch, 1, width])?;
        checks::expect_shape("encoder.attention_mask", &attention_mask, &[batch, width])?;
        Ok(Self {
            context,
            mask,
            attention_mask,
        })
    }

    pub fn context(&self) -> &Tensor {
        &self.context
    }

    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    pub fn attention_mask(&self) -> &Tensor {
        &self.attention_mask
    }

    pub fn batch_size(&self) -> usize {
        self.context.dims()[0]
    }

    pub fn context_dim(&self) -> usize {
        self.context.dims()[1]
    }

    pub fn source_len(&self) -> usize {
        self.context.dims()[2]
    }

    /// Masked average of the context over time, `(B, C)`.
    pub fn mean_context(&self, graph: &mut Graph) -> Result<Tensor> {
        let masked = graph.track(self.context.broadcast_mul(&self.mask)?);
        let total = graph.track(masked.sum(D::Minus1)?);
        let counts = graph.track(self.mask.sum(D::Minus1)?);
        Ok(graph.track(total.broadcast_div(&counts)?))
    }

    /// The state seen by `rows` hypotheses.
    ///
    /// A single-sentence state is broadcast over the hypotheses of a search;
    /// otherwise the batch sizes must already agree.
    pub fn for_rows(&self, rows: usize) -> Result<EncoderState> {
        let batch = self.batch_size();
        if batch == rows {
            return Ok(self.clone());
        }
        if batch != 1 {
            return Err(ModelError::state(format!(
                "cannot spread an encoder state of {batch} sentences over {rows} rows"
            )));
        }
        let (_, dim, width) = self.context.dims3()?;
        Ok(Self {
            context: self.context.broadcast_as((rows, dim, width))?.contiguous()?,
            mask: self.mask.broadcast_as((rows, 1, width))?.contiguous()?,
            attention_mask: self
                .attention_mask
                .broadcast_as((rows, width))?
                .contiguous()?,
        })
    }
}

/// Running state of the decoder.
///
/// After [`crate::Decoder::step`] the state additionally carries the logits
/// `(B, T, V)`, attention contexts `(B, C, T)` and, for attentive decoders,
/// attention weights `(B, T, T_src)` of the step.
#[derive(Debug, Clone)]
pub struct DecoderState {
    hidden: Tensor,
    encoder: Arc<EncoderState>,
    target_embeddings: Option<Tensor>,
    logits: Option<Tensor>,
    contexts: Option<Tensor>,
    attention: Option<Tensor>,
}

impl DecoderState {
    pub fn new(hidden: Tensor, encoder: Arc<EncoderState>) -> Self {
        Self {
            hidden,
            encoder,
            target_embeddings: None,
            logits: None,
            contexts: None,
            attention: None,
        }
    }

    /// State produced by a decoding step.
    pub fn stepped(
        hidden: Tensor,
        encoder: Arc<EncoderState>,
        logits: Tensor,
        contexts: Tensor,
        attention: Option<Tensor>,
    ) -> Self {
        Self {
            hidden,
            encoder,
            target_embeddings: None,
            logits: Some(logits),
            contexts: Some(contexts),
            attention,
        }
    }

    pub fn hidden(&self) -> &Tensor {
        &self.hidden
    }

    pub fn encoder(&self) -> &Arc<EncoderState> {
        &self.encoder
    }

    /// Number of live rows (sentences or hypotheses).
    pub fn rows(&self) -> usize {
        self.hidden.dims()[0]
    }

    pub fn target_embeddings(&self) -> Option<&Tensor> {
        self.target_embeddings.as_ref()
    }

    pub fn set_target_embeddings(&mut self, embeddings: Tensor) {
        self.target_embeddings = Some(embeddings);
    }

    pub fn logits(&self) -> Option<&Tensor> {
        self.logits.as_ref()
    }

    pub fn contexts(&self) -> Option<&Tensor> {
        self.contexts.as_ref()
    }

    pub fn attention(&self) -> Option<&Tensor> {
        self.attention.as_ref()
    }

    /// Log-probabilities of the last logits, `(B, T, V)`.
    pub fn log_probs(&self) -> Result<Tensor> {
        let logits = self
            .logits
            .as_ref()
            .ok_or_else(|| ModelError::state("no logits before the first step"))?;
        Ok(candle_nn::ops::log_softmax(logits, D::Minus1)?)
    }

    /// Keeps the hidden rows of surviving hypotheses, in the given order.
    pub fn select_hypotheses(&self, indices: &[u32]) -> Result<DecoderState> {
        if indices.is_empty() {
            return Err(ModelError::state("no hypotheses selected"));
        }
        let rows = self.rows();
        if let Some(bad) = indices.iter().find(|i| **i as usize >= rows) {
            return Err(ModelError::state(format!(
                "hypothesis {bad} does not exist among {rows} rows"
            )));
        }
        let index = Tensor::from_slice(indices, indices.len(), self.hidden.device())?;
        Ok(DecoderState::new(
            self.hidden.index_select(&index, 0)?,
            Arc::clone(&self.encoder),
        ))
    }
}
