//! Additive (MLP) attention in the Nematus parameter layout.
//!
//! ```text
//! mapped  = context · Wc_att                       (once per pass)
//! scores  = tanh(state · W_comb_att + mapped + b_att) · U_att
//! weights = softmax(scores + mask)
//! output  = Σ_t weights_t · context_t
//! ```

use std::sync::OnceLock;

use candle_core::{DType, Tensor, D};
use candle_nn::ops::softmax;
use layers::{Graph, ParamInit, ParameterSpec};

use crate::core::{Attention, AttentionError, AttentionOutput, Config};

/// Parameter names of one additive attention block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionNames {
    pub state_weight: String,
    pub context_weight: String,
    pub bias: String,
    pub score_weight: String,
}

impl AttentionNames {
    /// `{prefix}_W_comb_att`, `{prefix}_Wc_att`, `{prefix}_b_att`, `{prefix}_U_att`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            state_weight: format!("{prefix}_W_comb_att"),
            context_weight: format!("{prefix}_Wc_att"),
            bias: format!("{prefix}_b_att"),
            score_weight: format!("{prefix}_U_att"),
        }
    }
}

/// Set by the first `attend` call in the process.
static KERNEL_ANNOUNCED: OnceLock<()> = OnceLock::new();

/// Attention scored by a one-hidden-layer network over state and context.
#[derive(Debug, Clone)]
pub struct AdditiveAttention {
    config: Config,
    names: AttentionNames,
}

impl AdditiveAttention {
    pub fn new(config: Config, names: AttentionNames) -> Result<Self, AttentionError> {
        config.validate()?;
        Ok(Self { config, names })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let Config {
            state_dim,
            context_dim,
            attention_dim,
        } = self.config;
        vec![
            ParameterSpec::weight(&self.names.state_weight, state_dim, attention_dim),
            ParameterSpec::weight(&self.names.context_weight, context_dim, attention_dim),
            ParameterSpec::bias(&self.names.bias, attention_dim),
            ParameterSpec::weight(&self.names.score_weight, attention_dim, 1),
        ]
    }

    fn shape_error(context: String) -> AttentionError {
        AttentionError::InvalidShape { context }
    }
}

impl Attention for AdditiveAttention {
    fn precompute(&self, graph: &mut Graph, context: &Tensor) -> Result<Tensor, AttentionError> {
        let Config {
            context_dim,
            attention_dim,
            ..
        } = self.config;
        let (batch, width, src_len) = context.dims3()?;
        if width != context_dim {
            return Err(Self::shape_error(format!(
                "context has {width} features, expected {context_dim}"
            )));
        }
        let weight = graph.param(
            &self.names.context_weight,
            (context_dim, attention_dim),
            &ParamInit::GlorotUniform,
        )?;
        let mapped = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch * src_len, context_dim))?
            .matmul(&weight)?
            .reshape((batch, src_len, attention_dim))?;
        Ok(graph.track(mapped))
    }

    fn attend(
        &self,
        graph: &mut Graph,
        state: &Tensor,
        context: &Tensor,
        mapped: &Tensor,
        mask: &Tensor,
    ) -> Result<AttentionOutput, AttentionError> {
        let Config {
            state_dim,
            attention_dim,
            ..
        } = self.config;
        let (batch, _, src_len) = context.dims3()?;
        if state.dims() != [batch, state_dim] {
            return Err(Self::shape_error(format!(
                "query state {:?} does not match [{batch}, {state_dim}]",
                state.dims()
            )));
        }
        if mapped.dims() != [batch, src_len, attention_dim] || mask.dims() != [batch, src_len] {
            return Err(Self::shape_error(format!(
                "mapped context {:?} or mask {:?} does not cover [{batch}, {src_len}]",
                mapped.dims(),
                mask.dims()
            )));
        }

        if KERNEL_ANNOUNCED.set(()).is_ok() {
            log::info!(
                "additive attention: state_dim={} context_dim={} attention_dim={}",
                state_dim,
                self.config.context_dim,
                attention_dim
            );
        }

        let glorot = ParamInit::GlorotUniform;
        let state_weight = graph.param(&self.names.state_weight, (state_dim, attention_dim), &glorot)?;
        let bias = graph.param(&self.names.bias, (1, attention_dim), &ParamInit::Zeros)?;
        let score_weight = graph.param(&self.names.score_weight, (attention_dim, 1), &glorot)?;

        let projected = graph.track(state.contiguous()?.matmul(&state_weight)?);
        let query = graph.track(projected.broadcast_add(&bias)?).unsqueeze(1)?;
        let combined = graph.track(mapped.broadcast_add(&query)?);
        let hidden = graph.track(combined.tanh()?);
        let scores = hidden
            .reshape((batch * src_len, attention_dim))?
            .matmul(&score_weight)?
            .reshape((batch, src_len))?;
        let scores = graph.track(scores);
        let additive = graph.track(mask.to_dtype(DType::F32)?);
        let scores = graph.track(scores.add(&additive)?);
        let weights = softmax(&scores, D::Minus1)?;

        let attended = context
            .contiguous()?
            .matmul(&weights.unsqueeze(2)?)?
            .squeeze(2)?;
        Ok(AttentionOutput {
            context: graph.track(attended),
            weights: graph.track(weights),
        })
    }
}
