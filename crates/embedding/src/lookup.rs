//! Combined token plus position lookup producing `(batch, E + P, time)` inputs.

use candle_core::{bail, Result, Tensor};
use layers::{Graph, ParameterSpec};

use crate::positional::{clipped_positions, PositionEmbedding};
use crate::token::{TokenEmbedding, TokenEmbeddingConfig};

/// Token table with an optional position table concatenated on the feature axis.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingLookup {
    token: TokenEmbedding,
    position: Option<PositionEmbedding>,
}

impl EmbeddingLookup {
    pub fn new(token: TokenEmbedding, position: Option<PositionEmbedding>) -> Self {
        Self { token, position }
    }

    /// Builds the tables `token_name (vocab, dim_emb)` and, when `dim_pos > 0`,
    /// `position_name (max_len + 1, dim_pos)`.
    pub fn with_names(
        token_name: &str,
        position_name: &str,
        vocab_size: usize,
        dim_emb: usize,
        dim_pos: usize,
        max_len: usize,
    ) -> Result<Self> {
        let token = TokenEmbedding::new(TokenEmbeddingConfig {
            name: token_name.to_string(),
            vocab_size,
            hidden_dim: dim_emb,
        })?;
        let position = if dim_pos > 0 {
            Some(PositionEmbedding::new(position_name, max_len, dim_pos)?)
        } else {
            None
        };
        Ok(Self::new(token, position))
    }

    pub fn token(&self) -> &TokenEmbedding {
        &self.token
    }

    pub fn position(&self) -> Option<&PositionEmbedding> {
        self.position.as_ref()
    }

    /// Feature width of a looked up column, `E + P`.
    pub fn width(&self) -> usize {
        self.token.config().hidden_dim + self.position.as_ref().map_or(0, |p| p.dim())
    }

    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = vec![self.token.parameter_spec()];
        if let Some(position) = &self.position {
            specs.push(position.parameter_spec());
        }
        specs
    }

    /// Embeds a time-major flat id list into `(batch, E + P, time)`.
    pub fn forward(&self, graph: &mut Graph, ids: &[u32], batch_size: usize) -> Result<Tensor> {
        if batch_size == 0 || ids.len() % batch_size != 0 {
            bail!(
                "{} ids cannot be split into batches of {}",
                ids.len(),
                batch_size
            );
        }
        let time = ids.len() / batch_size;
        let mut rows = self.token.lookup(graph, ids)?;
        if let Some(position) = &self.position {
            let positions = clipped_positions(ids.len(), batch_size, position.max_len());
            let position_rows = position.lookup(graph, &positions)?;
            rows = graph.track(Tensor::cat(&[&rows, &position_rows], 1)?);
        }
        let columns = rows
            .reshape((time, batch_size, self.width()))?
            .permute((1, 2, 0))?
            .contiguous()?;
        Ok(graph.track(columns))
    }

    /// Embeds one id per row at a single `position`, returning `(rows, E + P, 1)`.
    pub fn select(&self, graph: &mut Graph, ids: &[u32], position: usize) -> Result<Tensor> {
        let mut rows = self.token.lookup(graph, ids)?;
        if let Some(table) = &self.position {
            let clipped = position.min(table.max_len()) as u32;
            let positions = vec![clipped; ids.len()];
            let position_rows = table.lookup(graph, &positions)?;
            rows = graph.track(Tensor::cat(&[&rows, &position_rows], 1)?);
        }
        let column = rows.reshape((ids.len(), self.width(), 1))?;
        Ok(graph.track(column))
    }
}
