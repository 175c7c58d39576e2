use super::*;
use candle_core::{Device, Result};

// Two sentences of width three, time-major: lengths 3 and 1.
const FLAGS: [f32; 6] = [1.0, 1.0, 1.0, 0.0, 1.0, 0.0];

#[test]
fn validity_mask_is_batch_major() -> Result<()> {
    let mask = validity_mask(&Device::Cpu, &FLAGS, 2, 3)?;
    assert_eq!(mask.dims(), &[2, 1, 3]);
    assert_eq!(
        mask.squeeze(1)?.to_vec2::<f32>()?,
        vec![vec![1.0, 1.0, 1.0], vec![1.0, 0.0, 0.0]]
    );
    Ok(())
}

#[test]
fn additive_mask_discards_padding() -> Result<()> {
    let mask = additive_padding_mask(&Device::Cpu, &FLAGS, 2, 3)?.to_vec2::<f32>()?;
    let inf = f32::NEG_INFINITY;
    assert_eq!(mask, vec![vec![0.0, 0.0, 0.0], vec![0.0, inf, inf]]);
    Ok(())
}

#[test]
fn flag_count_must_match() {
    assert!(validity_mask(&Device::Cpu, &FLAGS, 2, 2).is_err());
}
