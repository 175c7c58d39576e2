//! Builders for padding masks used to drop padded source positions.
//!
//! Validity flags arrive time-major (`flags[t * batch + b]`), the way batches
//! store them. Masks are produced batch-major.

use candle_core::{bail, Device, Result, Tensor};

use super::MASK_DTYPE;

fn batch_major(flags: &[f32], batch: usize, width: usize) -> Result<Vec<f32>> {
    if flags.len() != batch * width {
        bail!(
            "expected {} validity flags for batch {batch} and width {width}, got {}",
            batch * width,
            flags.len()
        );
    }
    let mut data = vec![0f32; batch * width];
    for t in 0..width {
        for b in 0..batch {
            data[b * width + t] = flags[t * batch + b];
        }
    }
    Ok(data)
}

/// Multiplicative `[batch, 1, width]` mask of ones and zeros.
pub fn validity_mask(device: &Device, flags: &[f32], batch: usize, width: usize) -> Result<Tensor> {
    let data = batch_major(flags, batch, width)?;
    Tensor::from_vec(data, (batch, 1, width), device)?.to_dtype(MASK_DTYPE)
}

/// Additive `[batch, width]` mask with `NEG_INFINITY` on padded positions.
pub fn additive_padding_mask(
    device: &Device,
    flags: &[f32],
    batch: usize,
    width: usize,
) -> Result<Tensor> {
    let data = batch_major(flags, batch, width)?
        .into_iter()
        .map(|flag| if flag > 0.0 { 0.0 } else { f32::NEG_INFINITY })
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (batch, width), device)
}

