//! Dimensions shared by additive attention implementations.

use super::AttentionError;

/// Sizes of the query state, the attended context and the hidden scoring layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Width of the decoder state used as the query.
    pub state_dim: usize,
    /// Width of one encoder context column.
    pub context_dim: usize,
    /// Width of the hidden layer the scores are computed in.
    pub attention_dim: usize,
}

impl Config {
    pub fn new(state_dim: usize, context_dim: usize, attention_dim: usize) -> Self {
        Self {
            state_dim,
            context_dim,
            attention_dim,
        }
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.state_dim == 0 || self.context_dim == 0 || self.attention_dim == 0 {
            return Err(AttentionError::InvalidShape {
                context: format!("attention dimensions must be positive, got {self:?}"),
            });
        }
        Ok(())
    }
}
