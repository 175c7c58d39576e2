//! Autoregressive decoders.
//!
//! A decoder starts from a state derived from the encoder context and then
//! steps over every target column present in the state's target embeddings:
//! all columns at once during training, one column per call during search.

mod attentive;
mod plain;
mod readout;

use std::sync::Arc;

use candle_core::Tensor;
use embedding::EmbeddingLookup;
use layers::{Affine, Graph, ParameterSpec};

use crate::batch::CorpusBatch;
use crate::config::ModelConfig;
use crate::error::Result;
use crate::states::{DecoderState, EncoderState};

pub use attentive::AttentionDecoder;
pub use plain::PlainDecoder;
pub use readout::Readout;

/// Target tensors for the loss, batch-major `(B, T)`.
#[derive(Debug, Clone)]
pub struct TargetBatch {
    pub indices: Tensor,
    pub mask: Tensor,
}

/// Role of a target decoder.
pub trait Decoder: Send + Sized {
    fn new(config: &ModelConfig, context_dim: usize) -> Result<Self>;

    /// Target embedding lookup (`Wemb_dec`, `Wpos_dec`).
    fn embeddings(&self) -> &EmbeddingLookup;

    /// Initial state: `tanh(mean_masked(context) · ff_state_W + ff_state_b)`.
    fn start_state(&self, graph: &mut Graph, encoder: Arc<EncoderState>) -> Result<DecoderState>;

    /// Decodes every column of the state's target embeddings.
    fn step(&self, graph: &mut Graph, state: &DecoderState) -> Result<DecoderState>;

    fn parameter_specs(&self) -> Vec<ParameterSpec>;

    /// Installs the target sequence shifted right by one column (column 0 is
    /// zero) and returns the indices and mask the loss is computed against.
    fn ground_truth(
        &self,
        graph: &mut Graph,
        state: &mut DecoderState,
        batch: &CorpusBatch,
    ) -> Result<TargetBatch> {
        let target = batch.target();
        let (rows, width) = (target.batch_size(), target.width());
        let embedded = self.embeddings().forward(graph, target.indices(), rows)?;
        let shifted = shift_right(graph, &embedded)?;
        state.set_target_embeddings(shifted);

        let indices = graph.indices(&target.batch_major_indices(), (rows, width))?;
        let mask = graph.constant(target.batch_major_mask(), (rows, width))?;
        Ok(TargetBatch { indices, mask })
    }

    /// Installs the embeddings of one chosen token per live row at `position`.
    ///
    /// An empty `indices` list installs zero embeddings, which is how search
    /// starts before any token exists.
    fn select_embeddings(
        &self,
        graph: &mut Graph,
        state: &mut DecoderState,
        indices: &[u32],
        position: usize,
    ) -> Result<()> {
        let selected = if indices.is_empty() {
            graph.zeros((state.rows(), self.embeddings().width(), 1))?
        } else {
            self.embeddings().select(graph, indices, position)?
        };
        state.set_target_embeddings(selected);
        Ok(())
    }
}

/// `(B, F, T)` → `(B, F, T)` with column `t` holding input column `t - 1`.
pub(crate) fn shift_right(graph: &mut Graph, columns: &Tensor) -> Result<Tensor> {
    let (rows, features, width) = columns.dims3()?;
    let zero = graph.zeros((rows, features, 1))?;
    if width == 1 {
        return Ok(zero);
    }
    let shifted = Tensor::cat(&[&zero, &columns.narrow(2, 0, width - 1)?], 2)?;
    Ok(graph.track(shifted))
}

/// `ff_state_W (C, H)` and `ff_state_b (1, H)`.
pub(crate) fn state_initializer(context_dim: usize, state_dim: usize) -> Affine {
    Affine::new("ff_state_W", "ff_state_b", context_dim, state_dim)
}

pub(crate) fn initial_hidden(
    graph: &mut Graph,
    initializer: &Affine,
    encoder: &EncoderState,
) -> Result<Tensor> {
    let mean = encoder.mean_context(graph)?;
    let hidden = initializer.forward(graph, &mean)?.tanh()?;
    Ok(graph.track(hidden))
}

pub(crate) fn target_lookup(config: &ModelConfig) -> Result<EmbeddingLookup> {
    Ok(EmbeddingLookup::with_names(
        "Wemb_dec",
        "Wpos_dec",
        config.target_vocab(),
        config.dim_emb,
        config.dim_pos,
        config.max_length,
    )?)
}

/// Column `t` of a `(B, F, T)` tensor as a contiguous `(B, F)` matrix.
pub(crate) fn column(columns: &Tensor, t: usize) -> Result<Tensor> {
    Ok(columns.narrow(2, t, 1)?.squeeze(2)?.contiguous()?)
}
