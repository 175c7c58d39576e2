//! Core traits and types shared across attention implementations.
//!
//! Contexts use the `[batch, context_dim, src_len]` layout produced by the
//! encoders, queries are `[batch, state_dim]`, and masks are additive
//! `[batch, src_len]` tensors holding `0.0` or `f32::NEG_INFINITY`.

pub mod config;
pub mod errors;

use candle_core::Tensor;
use layers::Graph;

pub use config::Config;
pub use errors::AttentionError;

/// Result of attending once: the weighted context and the weights themselves.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, context_dim]`.
    pub context: Tensor,
    /// `[batch, src_len]`, rows sum to one over unmasked positions.
    pub weights: Tensor,
}

/// Unified interface for attention over a fixed encoder context.
pub trait Attention {
    /// Projects the context once per decoding pass; the result is reused by
    /// every [`Attention::attend`] call over the same context.
    fn precompute(&self, graph: &mut Graph, context: &Tensor) -> Result<Tensor, AttentionError>;

    /// Attends with `state` over `context`, skipping positions masked out by `mask`.
    fn attend(
        &self,
        graph: &mut Graph,
        state: &Tensor,
        context: &Tensor,
        mapped: &Tensor,
        mask: &Tensor,
    ) -> Result<AttentionOutput, AttentionError>;
}
