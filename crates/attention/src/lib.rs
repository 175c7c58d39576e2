//! Additive attention for recurrent encoder-decoder models.
//!
//! A decoder state attends over an encoder context laid out as
//! `[batch, context_dim, src_len]`. Padded source positions are removed with
//! additive masks before the softmax, so their weights are exactly zero and
//! every row of weights sums to one.
//!
//! The context projection is computed once per decoding pass via
//! [`Attention::precompute`] and reused by every step.

pub mod additive;
pub mod core;
pub mod masks;

pub use additive::{AdditiveAttention, AttentionNames};
pub use core::{Attention, AttentionError, AttentionOutput, Config};
