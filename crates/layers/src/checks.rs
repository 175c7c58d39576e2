//! Lightweight validation helpers shared across layer components.
//!
//! Every check carries a label naming the tensor under test so a failed build
//! reports which node was malformed. They return `candle_core::Result<()>` so
//! call sites can propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Validates the trailing feature axis of a tensor.
pub fn expect_last_dim(label: &str, tensor: &Tensor, width: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(actual) if *actual == width => Ok(()),
        _ => Err(Error::Msg(format!(
            "{label}: expected trailing dimension {width}, got {:?}",
            tensor.dims()
        ))),
    }
}

/// Validates the `(batch, features, time)` convention used for sequences.
pub fn expect_batch_features_time(
    label: &str,
    tensor: &Tensor,
    batch: usize,
    features: usize,
) -> Result<usize> {
    match tensor.dims() {
        [b, f, time] if *b == batch && *f == features => Ok(*time),
        dims => Err(Error::Msg(format!(
            "{label}: expected ({batch}, {features}, time) layout, got {:?}",
            dims
        ))),
    }
}
