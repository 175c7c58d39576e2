//! Mask utilities shared by attention implementations.
//!
//! Additive masks hold `0.0` (keep) or `f32::NEG_INFINITY` (discard) and are
//! added to scores before the softmax. Validity masks hold `1.0`/`0.0` and
//! are multiplied into recurrent states and averages.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use padding::{additive_padding_mask, validity_mask};

#[cfg(test)]
mod tests;
