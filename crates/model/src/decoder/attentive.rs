use std::sync::Arc;

use attention::{AdditiveAttention, Attention, AttentionNames, Config as AttentionConfig};
use candle_core::Tensor;
use embedding::EmbeddingLookup;
use layers::{Affine, Graph, Gru, GruNames, ParameterSpec};

use super::{column, initial_hidden, state_initializer, target_lookup, Decoder, Readout};
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::states::{DecoderState, EncoderState};

/// Conditional GRU decoder with additive attention.
///
/// Each target column runs two cells: the first consumes the previous target
/// embedding, the second refines its output with the attention context
/// computed from the first cell's state.
#[derive(Debug, Clone)]
pub struct AttentionDecoder {
    embeddings: EmbeddingLookup,
    initializer: Affine,
    cell: Gru,
    conditional: Gru,
    attention: AdditiveAttention,
    readout: Readout,
}

fn conditional_names() -> GruNames {
    GruNames {
        w: "decoder_Wc".to_string(),
        u: "decoder_U_nl".to_string(),
        b: "decoder_b_nl".to_string(),
        wx: "decoder_Wcx".to_string(),
        ux: "decoder_Ux_nl".to_string(),
        bx: "decoder_bx_nl".to_string(),
    }
}

impl Decoder for AttentionDecoder {
    fn new(config: &ModelConfig, context_dim: usize) -> Result<Self> {
        config.validate()?;
        let embeddings = target_lookup(config)?;
        let state_dim = config.dim_rnn;
        let attention = AdditiveAttention::new(
            AttentionConfig::new(state_dim, context_dim, context_dim),
            AttentionNames::with_prefix("decoder"),
        )?;
        Ok(Self {
            initializer: state_initializer(context_dim, state_dim),
            cell: Gru::new(GruNames::with_prefix("decoder"), embeddings.width(), state_dim),
            conditional: Gru::new(conditional_names(), context_dim, state_dim),
            attention,
            readout: Readout::new(
                state_dim,
                embeddings.width(),
                context_dim,
                config.dim_emb,
                config.target_vocab(),
            ),
            embeddings,
        })
    }

    fn embeddings(&self) -> &EmbeddingLookup {
        &self.embeddings
    }

    fn start_state(&self, graph: &mut Graph, encoder: Arc<EncoderState>) -> Result<DecoderState> {
        let hidden = initial_hidden(graph, &self.initializer, &encoder)?;
        Ok(DecoderState::new(hidden, encoder))
    }

    fn step(&self, graph: &mut Graph, state: &DecoderState) -> Result<DecoderState> {
        let embeddings = state.target_embeddings().ok_or_else(|| {
            ModelError::state("no target embeddings; call ground_truth or select_embeddings first")
        })?;
        let (rows, _, width) = embeddings.dims3()?;
        let encoder = state.encoder().for_rows(rows)?;
        let mapped = self.attention.precompute(graph, encoder.context())?;
        let first = self.cell.weights(graph)?;
        let second = self.conditional.weights(graph)?;

        let mut hidden = state.hidden().clone();
        let mut states = Vec::with_capacity(width);
        let mut contexts = Vec::with_capacity(width);
        let mut weights = Vec::with_capacity(width);
        for t in 0..width {
            let input = column(embeddings, t)?;
            let proposal = self.cell.step(graph, &first, &input, &hidden, None)?;
            let attended = self.attention.attend(
                graph,
                &proposal,
                encoder.context(),
                &mapped,
                encoder.attention_mask(),
            )?;
            hidden = self
                .conditional
                .step(graph, &second, &attended.context, &proposal, None)?;
            states.push(hidden.clone());
            contexts.push(attended.context);
            weights.push(attended.weights);
        }

        let states = graph.track(Tensor::stack(&states, 2)?);
        let contexts = graph.track(Tensor::stack(&contexts, 2)?);
        let alignments = graph.track(Tensor::stack(&weights, 1)?);
        let logits = self.readout.forward(graph, &states, embeddings, &contexts)?;
        Ok(DecoderState::stepped(
            hidden,
            Arc::clone(state.encoder()),
            logits,
            contexts,
            Some(alignments),
        ))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.embeddings.parameter_specs();
        specs.extend(self.initializer.parameter_specs());
        specs.extend(self.cell.parameter_specs());
        specs.extend(self.attention.parameter_specs());
        specs.extend(self.conditional.parameter_specs());
        specs.extend(self.readout.parameter_specs());
        specs
    }
}
