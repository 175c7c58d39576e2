//! Non-linearities candle does not ship as a differentiable op.

use candle_core::{Result, Tensor};

/// `1 / (1 + exp(-x))`, composed from primitive ops so autograd works on
/// every backend.
pub fn sigmoid(input: &Tensor) -> Result<Tensor> {
    input.neg()?.exp()?.affine(1.0, 1.0)?.recip()
}
