//! Model coordinator owning one encoder, one decoder and their graph.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::Tensor;
use layers::{Graph, ParameterSpec};

use crate::batch::CorpusBatch;
use crate::config::ModelConfig;
use crate::decoder::{AttentionDecoder, Decoder};
use crate::encoder::{BidirectionalEncoder, Encoder};
use crate::error::{ModelError, Result};
use crate::loss::{CrossEntropyLoss, LossOutput};
use crate::states::DecoderState;

/// Bidirectional GRU encoder with a conditional GRU attention decoder.
pub type Nematus = EncoderDecoder<BidirectionalEncoder, AttentionDecoder>;

/// Path of the configuration side file written next to `model`.
pub fn config_side_path(model: &Path) -> PathBuf {
    let mut name = model
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("model"));
    name.push(".config.toml");
    model.with_file_name(name)
}

/// Encoder-decoder pair sharing one parameter graph.
#[derive(Debug)]
pub struct EncoderDecoder<E: Encoder, D: Decoder> {
    config: ModelConfig,
    graph: Graph,
    encoder: E,
    decoder: D,
    loss: CrossEntropyLoss,
}

impl<E: Encoder, D: Decoder> EncoderDecoder<E, D> {
    /// Validates `config` and assembles the pair over `graph`.
    pub fn new(config: ModelConfig, graph: Graph) -> Result<Self> {
        config.validate()?;
        let encoder = E::new(&config)?;
        let decoder = D::new(&config, encoder.context_dim())?;
        Ok(Self {
            config,
            graph,
            encoder,
            decoder,
            loss: CrossEntropyLoss::new(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Full roster of persisted parameters.
    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.encoder.parameter_specs();
        specs.extend(self.decoder.parameter_specs());
        specs
    }

    /// Creates every roster parameter that does not exist yet.
    pub fn initialize_parameters(&mut self) -> Result<()> {
        let specs = self.parameter_specs();
        self.graph.materialize(&specs)?;
        Ok(())
    }

    /// Drops the nodes of the previous build and rebuilds both components
    /// with identical hyperparameters. Parameters are kept.
    pub fn clear(&mut self) -> Result<()> {
        self.graph.reset();
        self.encoder = E::new(&self.config)?;
        self.decoder = D::new(&self.config, self.encoder.context_dim())?;
        Ok(())
    }

    /// Releases the parameter set as well.
    pub fn clear_parameters(&mut self) -> Result<()> {
        self.graph.clear_parameters();
        self.clear()
    }

    /// Encodes `batch` and derives the decoder's initial state.
    pub fn start_state(&mut self, batch: &CorpusBatch) -> Result<DecoderState> {
        let encoded = self.encoder.build(&mut self.graph, batch)?;
        self.decoder.start_state(&mut self.graph, Arc::new(encoded))
    }

    pub fn step(&mut self, state: &DecoderState) -> Result<DecoderState> {
        self.decoder.step(&mut self.graph, state)
    }

    pub fn select_embeddings(
        &mut self,
        state: &mut DecoderState,
        indices: &[u32],
        position: usize,
    ) -> Result<()> {
        self.decoder
            .select_embeddings(&mut self.graph, state, indices, position)
    }

    /// Teacher-forced pass over `batch`: the state after the unrolled step.
    pub fn forward(&mut self, batch: &CorpusBatch) -> Result<DecoderState> {
        self.clear()?;
        let mut state = self.start_state(batch)?;
        self.decoder.ground_truth(&mut self.graph, &mut state, batch)?;
        self.step(&state)
    }

    /// Builds the training graph for `batch` and returns the scalar loss.
    pub fn build(&mut self, batch: &CorpusBatch) -> Result<Tensor> {
        Ok(self.build_with_metrics(batch)?.loss)
    }

    /// Same as [`EncoderDecoder::build`] with token counts and accuracy.
    pub fn build_with_metrics(&mut self, batch: &CorpusBatch) -> Result<LossOutput> {
        self.clear()?;
        let mut state = self.start_state(batch)?;
        let target = self
            .decoder
            .ground_truth(&mut self.graph, &mut state, batch)?;
        let next = self.step(&state)?;
        let logits = next
            .logits()
            .ok_or_else(|| ModelError::state("decoder step produced no logits"))?;
        self.loss
            .compute(&mut self.graph, logits, &target.indices, &target.mask)
    }

    /// Whether the last build fits the graph workspace.
    pub fn fits(&self) -> bool {
        self.graph.fits()
    }

    /// Fails with [`ModelError::Capacity`] when the last build, made from
    /// `batch`, does not fit the workspace.
    pub fn ensure_fits(&self, batch: &CorpusBatch) -> Result<()> {
        if self.graph.fits() {
            return Ok(());
        }
        Err(ModelError::capacity(format!(
            "batch of {} sentences with widths {:?} needs {} bytes, workspace holds {}",
            batch.size(),
            batch.widths(),
            self.graph.required_bytes(),
            self.graph.workspace().unwrap_or_default()
        )))
    }

    /// Loads the roster from `path`, failing on any missing or misshapen array.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let roster = self.parameter_specs();
        self.graph
            .load(path, &roster)
            .map_err(|err| ModelError::checkpoint(path, err))?;
        log::info!("loaded {} parameters from {}", roster.len(), path.display());
        Ok(())
    }

    /// Saves all parameters, and the configuration side file when asked.
    pub fn save(&mut self, path: &Path, include_config: bool) -> Result<()> {
        self.initialize_parameters()?;
        self.graph
            .save(path)
            .map_err(|err| ModelError::checkpoint(path, err))?;
        if include_config {
            self.config.save(&config_side_path(path))?;
        }
        log::info!("saved model to {}", path.display());
        Ok(())
    }

    /// Loads the configuration side file next to `path`, if any.
    pub fn load_config(path: &Path) -> Result<Option<ModelConfig>> {
        let side = config_side_path(path);
        if !side.exists() {
            return Ok(None);
        }
        ModelConfig::load(&side).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_file_sits_next_to_model() {
        assert_eq!(
            config_side_path(Path::new("/tmp/run/model.npz")),
            PathBuf::from("/tmp/run/model.npz.config.toml")
        );
    }
}
