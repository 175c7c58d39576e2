//! Sequence encoders.
//!
//! Both encoders embed one source stream with [`EmbeddingLookup`] and run GRU
//! passes over time with the stream's validity mask, so padded positions carry
//! the previous state forward. The context is laid out `(batch, C, time)`.

use attention::masks::{additive_padding_mask, validity_mask};
use candle_core::Tensor;
use embedding::EmbeddingLookup;
use layers::{Graph, Gru, GruNames, ParameterSpec};

use crate::batch::CorpusBatch;
use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::states::EncoderState;

/// Role of a source encoder.
pub trait Encoder: Send + Sized {
    /// Encoder for source stream 0.
    fn new(config: &ModelConfig) -> Result<Self>;

    /// Width `C` of one context column.
    fn context_dim(&self) -> usize;

    /// Encodes the configured stream of `batch`.
    fn build(&self, graph: &mut Graph, batch: &CorpusBatch) -> Result<EncoderState>;

    fn parameter_specs(&self) -> Vec<ParameterSpec>;
}

/// Embedding names of source stream `index`: `Wemb`/`Wpos` for the first
/// stream, `Wemb{index}`/`Wpos{index}` for additional sources.
pub fn source_embedding_names(index: usize) -> (String, String) {
    if index == 0 {
        ("Wemb".to_string(), "Wpos".to_string())
    } else {
        (format!("Wemb{index}"), format!("Wpos{index}"))
    }
}

fn source_lookup(config: &ModelConfig, index: usize) -> Result<EmbeddingLookup> {
    let (token, position) = source_embedding_names(index);
    Ok(EmbeddingLookup::with_names(
        &token,
        &position,
        config.source_vocab(index)?,
        config.dim_emb,
        config.dim_pos,
        config.max_length,
    )?)
}

/// Embedded source `(B, E + P, T)` with its validity and additive masks.
struct PreparedSource {
    inputs: Tensor,
    mask: Tensor,
    attention_mask: Tensor,
}

fn prepare_source(
    graph: &mut Graph,
    embeddings: &EmbeddingLookup,
    batch: &CorpusBatch,
    index: usize,
) -> Result<PreparedSource> {
    let stream = batch.stream(index)?;
    let (size, width) = (stream.batch_size(), stream.width());
    let inputs = embeddings.forward(graph, stream.indices(), size)?;
    let mask = validity_mask(graph.device(), stream.mask(), size, width)?;
    let attention_mask = additive_padding_mask(graph.device(), stream.mask(), size, width)?;
    Ok(PreparedSource {
        inputs,
        mask: graph.track(mask),
        attention_mask: graph.track(attention_mask),
    })
}

fn initial_state(graph: &mut Graph, batch: usize, dim: usize) -> Result<Tensor> {
    Ok(graph.zeros((batch, dim))?)
}

/// Single forward GRU pass; `C = dim_rnn`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentEncoder {
    index: usize,
    embeddings: EmbeddingLookup,
    forward: Gru,
}

impl RecurrentEncoder {
    /// Encoder for source stream `index`.
    pub fn for_stream(config: &ModelConfig, index: usize) -> Result<Self> {
        config.validate()?;
        let embeddings = source_lookup(config, index)?;
        let prefix = if index == 0 {
            "encoder".to_string()
        } else {
            format!("encoder{index}")
        };
        let forward = Gru::new(
            GruNames::with_prefix(&prefix),
            embeddings.width(),
            config.dim_rnn,
        );
        Ok(Self {
            index,
            embeddings,
            forward,
        })
    }
}

impl Encoder for RecurrentEncoder {
    fn new(config: &ModelConfig) -> Result<Self> {
        Self::for_stream(config, 0)
    }

    fn context_dim(&self) -> usize {
        self.forward.state_dim()
    }

    fn build(&self, graph: &mut Graph, batch: &CorpusBatch) -> Result<EncoderState> {
        let source = prepare_source(graph, &self.embeddings, batch, self.index)?;
        let rows = batch.size();
        let start = initial_state(graph, rows, self.forward.state_dim())?;
        let states = self
            .forward
            .apply(graph, &source.inputs, &start, Some(&source.mask), false)?;
        let context = graph.track(Tensor::stack(&states, 2)?);
        EncoderState::new(context, source.mask, source.attention_mask)
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.embeddings.parameter_specs();
        specs.extend(self.forward.parameter_specs());
        specs
    }
}

/// Forward and reversed GRU passes concatenated per step; `C = 2 * dim_rnn`.
#[derive(Debug, Clone, PartialEq)]
pub struct BidirectionalEncoder {
    index: usize,
    embeddings: EmbeddingLookup,
    forward: Gru,
    backward: Gru,
}

impl BidirectionalEncoder {
    /// Encoder for source stream `index`.
    pub fn for_stream(config: &ModelConfig, index: usize) -> Result<Self> {
        config.validate()?;
        let embeddings = source_lookup(config, index)?;
        let prefix = if index == 0 {
            "encoder".to_string()
        } else {
            format!("encoder{index}")
        };
        let width = embeddings.width();
        Ok(Self {
            index,
            forward: Gru::new(GruNames::with_prefix(&prefix), width, config.dim_rnn),
            backward: Gru::new(
                GruNames::with_prefix(&format!("{prefix}_r")),
                width,
                config.dim_rnn,
            ),
            embeddings,
        })
    }
}

impl Encoder for BidirectionalEncoder {
    fn new(config: &ModelConfig) -> Result<Self> {
        Self::for_stream(config, 0)
    }

    fn context_dim(&self) -> usize {
        self.forward.state_dim() + self.backward.state_dim()
    }

    fn build(&self, graph: &mut Graph, batch: &CorpusBatch) -> Result<EncoderState> {
        let source = prepare_source(graph, &self.embeddings, batch, self.index)?;
        let rows = batch.size();

        let start = initial_state(graph, rows, self.forward.state_dim())?;
        let forward = self
            .forward
            .apply(graph, &source.inputs, &start, Some(&source.mask), false)?;
        let start = initial_state(graph, rows, self.backward.state_dim())?;
        let mut backward = self
            .backward
            .apply(graph, &source.inputs, &start, Some(&source.mask), true)?;

        if forward.len() != backward.len() {
            return Err(ModelError::state(format!(
                "forward pass produced {} states, backward pass {}",
                forward.len(),
                backward.len()
            )));
        }
        backward.reverse();

        let mut columns = Vec::with_capacity(forward.len());
        for (f, b) in forward.iter().zip(&backward) {
            columns.push(graph.track(Tensor::cat(&[f, b], 1)?));
        }
        let context = graph.track(Tensor::stack(&columns, 2)?);
        EncoderState::new(context, source.mask, source.attention_mask)
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.embeddings.parameter_specs();
        specs.extend(self.forward.parameter_specs());
        specs.extend(self.backward.parameter_specs());
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn config() -> ModelConfig {
        ModelConfig {
            dim_vocabs: vec![12, 14],
            dim_emb: 4,
            dim_pos: 2,
            dim_rnn: 3,
            max_length: 8,
            seed: 5,
        }
    }

    #[test]
    fn bidirectional_context_doubles_width() -> Result<()> {
        let mut graph = Graph::new(Device::Cpu, 5);
        let encoder = BidirectionalEncoder::new(&config())?;
        let batch = CorpusBatch::from_sentences(&[
            vec![vec![1, 2, 3, 4], vec![5]],
            vec![vec![6, 7], vec![8, 9]],
        ])?;
        let state = encoder.build(&mut graph, &batch)?;
        assert_eq!(state.context().dims(), &[2, 6, 4]);
        assert_eq!(state.mask().dims(), &[2, 1, 4]);
        assert_eq!(encoder.context_dim(), 6);

        let names: Vec<_> = encoder.parameter_specs().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"Wpos".to_string()));
        assert!(names.contains(&"encoder_r_Ux".to_string()));
        for name in &names {
            assert!(graph.contains(name), "{name} was not created");
        }
        Ok(())
    }

    #[test]
    fn padded_steps_repeat_the_forward_state() -> Result<()> {
        let mut graph = Graph::new(Device::Cpu, 5);
        let encoder = RecurrentEncoder::new(&config())?;
        let batch = CorpusBatch::from_sentences(&[
            vec![vec![1, 2, 3], vec![4]],
            vec![vec![5], vec![8]],
        ])?;
        let state = encoder.build(&mut graph, &batch)?;
        assert_eq!(state.context().dims(), &[2, 3, 3]);
        let rows = state.context().to_vec3::<f32>()?;
        for feature in &rows[1] {
            assert_eq!(feature[0], feature[2]);
        }
        Ok(())
    }

    #[test]
    fn reversed_pass_aligns_with_source_positions() -> Result<()> {
        let mut graph = Graph::new(Device::Cpu, 5);
        let encoder = BidirectionalEncoder::new(&config())?;
        let batch = CorpusBatch::from_sentences(&[
            vec![vec![1, 2, 3], vec![6, 7]],
            vec![vec![5], vec![8]],
        ])?;
        let context = encoder.build(&mut graph, &batch)?.context().to_vec3::<f32>()?;
        let rnn = 3;

        // Trailing padding is visited first in reverse and keeps the zero start.
        for t in 1..3 {
            for feature in rnn..2 * rnn {
                assert_eq!(context[1][feature][t], 0.0);
            }
        }

        // A backward column is the state after reading its own position.
        let stream = batch.stream(0)?;
        let inputs = encoder.embeddings.forward(&mut graph, stream.indices(), 2)?;
        let weights = encoder.backward.weights(&mut graph)?;
        let zeros = graph.zeros((2, rnn))?;
        for (t, row) in [(2, 0), (0, 1)] {
            let column = inputs.narrow(2, t, 1)?.squeeze(2)?.contiguous()?;
            let fresh = encoder
                .backward
                .step(&mut graph, &weights, &column, &zeros, None)?
                .to_vec2::<f32>()?;
            for k in 0..rnn {
                let got = context[row][rnn + k][t];
                assert!((got - fresh[row][k]).abs() < 1e-5, "row {row} position {t}");
            }
        }
        Ok(())
    }

    #[test]
    fn additional_sources_use_numbered_tables() {
        assert_eq!(source_embedding_names(0).0, "Wemb");
        assert_eq!(source_embedding_names(1), ("Wemb1".into(), "Wpos1".into()));
    }
}
