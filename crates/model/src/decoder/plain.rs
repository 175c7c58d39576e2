use std::sync::Arc;

use candle_core::Tensor;
use embedding::EmbeddingLookup;
use layers::{Affine, Graph, Gru, GruNames, ParameterSpec};

use super::{column, initial_hidden, state_initializer, target_lookup, Decoder, Readout};
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::states::{DecoderState, EncoderState};

/// GRU decoder without attention; every step reads the masked mean context.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainDecoder {
    embeddings: EmbeddingLookup,
    initializer: Affine,
    cell: Gru,
    readout: Readout,
}

impl Decoder for PlainDecoder {
    fn new(config: &ModelConfig, context_dim: usize) -> Result<Self> {
        config.validate()?;
        let embeddings = target_lookup(config)?;
        Ok(Self {
            initializer: state_initializer(context_dim, config.dim_rnn),
            cell: Gru::new(GruNames::with_prefix("decoder"), embeddings.width(), config.dim_rnn),
            readout: Readout::new(
                config.dim_rnn,
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
        let weights = self.cell.weights(graph)?;

        let mut hidden = state.hidden().clone();
        let mut states = Vec::with_capacity(width);
        for t in 0..width {
            let input = column(embeddings, t)?;
            hidden = self.cell.step(graph, &weights, &input, &hidden, None)?;
            states.push(hidden.clone());
        }

        let mean = encoder.mean_context(graph)?;
        let (_, context_dim) = mean.dims2()?;
        let contexts = mean
            .unsqueeze(2)?
            .broadcast_as((rows, context_dim, width))?
            .contiguous()?;
        let contexts = graph.track(contexts);
        let states = graph.track(Tensor::stack(&states, 2)?);
        let logits = self.readout.forward(graph, &states, embeddings, &contexts)?;
        Ok(DecoderState::stepped(
            hidden,
            Arc::clone(state.encoder()),
            logits,
            contexts,
            None,
        ))
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.embeddings.parameter_specs();
        specs.extend(self.initializer.parameter_specs());
        specs.extend(self.cell.parameter_specs());
        specs.extend(self.readout.parameter_specs());
        specs
    }
}
