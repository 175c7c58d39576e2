use candle_core::Tensor;
use layers::{Affine, Graph, ParameterSpec};

use crate::error::Result;

/// Deep output layer:
/// `logits = tanh(h · W_lstm + y · W_prev + c · W_ctx) · W + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Readout {
    hidden: Affine,
    previous: Affine,
    context: Affine,
    output: Affine,
}

impl Readout {
    pub fn new(state_dim: usize, embedding_dim: usize, context_dim: usize, hidden_dim: usize, vocab: usize) -> Self {
        Self {
            hidden: Affine::new("ff_logit_lstm_W", "ff_logit_lstm_b", state_dim, hidden_dim),
            previous: Affine::new("ff_logit_prev_W", "ff_logit_prev_b", embedding_dim, hidden_dim),
            context: Affine::new("ff_logit_ctx_W", "ff_logit_ctx_b", context_dim, hidden_dim),
            output: Affine::new("ff_logit_W", "ff_logit_b", hidden_dim, vocab),
        }
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        [&self.hidden, &self.previous, &self.context, &self.output]
            .iter()
            .flat_map(|affine| affine.parameter_specs())
            .collect()
    }

    /// `states (B, H, T)`, `embeddings (B, E', T)`, `contexts (B, C, T)` → `(B, T, V)`.
    pub fn forward(
        &self,
        graph: &mut Graph,
        states: &Tensor,
        embeddings: &Tensor,
        contexts: &Tensor,
    ) -> Result<Tensor> {
        let h = self.hidden.forward(graph, &states.transpose(1, 2)?)?;
        let y = self.previous.forward(graph, &embeddings.transpose(1, 2)?)?;
        let c = self.context.forward(graph, &contexts.transpose(1, 2)?)?;
        let partial = graph.track(h.add(&y)?);
        let summed = graph.track(partial.add(&c)?);
        let merged = graph.track(summed.tanh()?);
        Ok(self.output.forward(graph, &merged)?)
    }
}
