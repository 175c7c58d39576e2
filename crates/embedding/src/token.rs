//! Token embedding tables resolved from the parameter graph.

use candle_core::{bail, Result, Tensor};
use layers::{Graph, ParamInit, ParameterSpec};

/// Configuration for a token embedding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEmbeddingConfig {
    /// Parameter name, e.g. `Wemb` or `Wemb_dec`.
    pub name: String,
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
}

/// A `(vocab_size, hidden_dim)` lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
}

impl TokenEmbedding {
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding {} requires vocab_size > 0", config.name);
        }
        if config.hidden_dim == 0 {
            bail!("token embedding {} requires hidden_dim > 0", config.name);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    pub fn parameter_spec(&self) -> ParameterSpec {
        ParameterSpec::weight(
            &self.config.name,
            self.config.vocab_size,
            self.config.hidden_dim,
        )
    }

    /// Gathers one row per id, returning `(ids.len(), hidden_dim)`.
    ///
    /// Ids outside the vocabulary are rejected before any lookup happens.
    pub fn lookup(&self, graph: &mut Graph, ids: &[u32]) -> Result<Tensor> {
        if ids.is_empty() {
            bail!("token embedding {} received no ids", self.config.name);
        }
        self.ensure_id_range(ids)?;
        let table = graph.param(
            &self.config.name,
            (self.config.vocab_size, self.config.hidden_dim),
            &ParamInit::GlorotUniform,
        )?;
        let index = graph.indices(ids, ids.len())?;
        let rows = table.index_select(&index, 0)?;
        Ok(graph.track(rows))
    }

    fn ensure_id_range(&self, ids: &[u32]) -> Result<()> {
        let vocab = self.config.vocab_size;
        match ids.iter().copied().max() {
            Some(max_id) if max_id as usize >= vocab => bail!(
                "token id {} exceeds vocab size {} of {}",
                max_id,
                vocab,
                self.config.name
            ),
            _ => Ok(()),
        }
    }
}
