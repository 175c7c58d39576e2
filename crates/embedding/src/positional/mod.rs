//! Learned absolute positions with clipping.
//!
//! Sequences are flattened time-major, so flat index `i` of a batch of size
//! `B` sits at time step `i / B`. Positions past the table's `max_len` reuse
//! the last row.

use candle_core::{bail, Result, Tensor};
use layers::{Graph, ParamInit, ParameterSpec};

/// Position of flat time-major index `index` in a batch of `batch_size`, clipped to `max_len`.
pub fn clipped_position(index: usize, batch_size: usize, max_len: usize) -> u32 {
    let step = index / batch_size.max(1);
    step.min(max_len) as u32
}

/// Positions for `count` flat time-major entries.
pub fn clipped_positions(count: usize, batch_size: usize, max_len: usize) -> Vec<u32> {
    (0..count)
        .map(|index| clipped_position(index, batch_size, max_len))
        .collect()
}

/// A `(max_len + 1, dim)` learned position table.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionEmbedding {
    name: String,
    max_len: usize,
    dim: usize,
}

impl PositionEmbedding {
    pub fn new(name: impl Into<String>, max_len: usize, dim: usize) -> Result<Self> {
        let name = name.into();
        if dim == 0 {
            bail!("position embedding {name} requires dim > 0");
        }
        Ok(Self { name, max_len, dim })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn parameter_spec(&self) -> ParameterSpec {
        ParameterSpec::weight(&self.name, self.max_len + 1, self.dim)
    }

    /// Rows for already clipped positions, `(positions.len(), dim)`.
    pub fn lookup(&self, graph: &mut Graph, positions: &[u32]) -> Result<Tensor> {
        if let Some(bad) = positions.iter().find(|p| **p as usize > self.max_len) {
            bail!("position {bad} exceeds table {} of length {}", self.name, self.max_len + 1);
        }
        let table = graph.param(
            &self.name,
            (self.max_len + 1, self.dim),
            &ParamInit::GlorotUniform,
        )?;
        let index = graph.indices(positions, positions.len())?;
        let rows = table.index_select(&index, 0)?;
        Ok(graph.track(rows))
    }
}
