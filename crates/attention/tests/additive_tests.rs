use attention::masks::additive_padding_mask;
use attention::{AdditiveAttention, Attention, AttentionNames, Config};
use candle_core::{Device, Result, Tensor};
use layers::Graph;

/// Additive mask for rows of the given lengths, via time-major validity flags.
fn mask_for_lengths(device: &Device, lengths: &[usize], width: usize) -> Result<Tensor> {
    let flags: Vec<f32> = (0..width)
        .flat_map(|t| lengths.iter().map(move |&len| if t < len { 1.0 } else { 0.0 }))
        .collect();
    additive_padding_mask(device, &flags, lengths.len(), width)
}

fn attention() -> AdditiveAttention {
    AdditiveAttention::new(Config::new(3, 4, 4), AttentionNames::with_prefix("decoder"))
        .expect("valid dimensions")
}

#[test]
fn weights_sum_to_one_and_skip_padding() -> Result<()> {
    let device = Device::Cpu;
    let mut graph = Graph::new(device.clone(), 17);
    let attention = attention();

    let context = Tensor::randn(0f32, 1.0, (2, 4, 5), &device)?;
    let state = Tensor::randn(0f32, 1.0, (2, 3), &device)?;
    let mask = mask_for_lengths(&device, &[5, 2], 5)?;

    let mapped = attention.precompute(&mut graph, &context).expect("precompute");
    let output = attention
        .attend(&mut graph, &state, &context, &mapped, &mask)
        .expect("attend");
    assert_eq!(output.context.dims(), &[2, 4]);
    assert_eq!(output.weights.dims(), &[2, 5]);

    let weights = output.weights.to_vec2::<f32>()?;
    for row in &weights {
        let total: f32 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-5, "row sums to {total}");
    }
    assert!(weights[1][2..].iter().all(|w| *w == 0.0));
    assert!(weights[1][..2].iter().all(|w| *w > 0.0));
    Ok(())
}

#[test]
fn single_valid_position_returns_that_column() -> Result<()> {
    let device = Device::Cpu;
    let mut graph = Graph::new(device.clone(), 3);
    let attention = attention();

    let context = Tensor::randn(0f32, 1.0, (1, 4, 3), &device)?;
    let state = Tensor::randn(0f32, 1.0, (1, 3), &device)?;
    let mask = mask_for_lengths(&device, &[1], 3)?;

    let mapped = attention.precompute(&mut graph, &context).expect("precompute");
    let output = attention
        .attend(&mut graph, &state, &context, &mapped, &mask)
        .expect("attend");

    let expected = context.narrow(2, 0, 1)?.squeeze(2)?.to_vec2::<f32>()?;
    let actual = output.context.to_vec2::<f32>()?;
    for (a, e) in actual[0].iter().zip(&expected[0]) {
        assert!((a - e).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn rejects_mismatched_state() -> Result<()> {
    let device = Device::Cpu;
    let mut graph = Graph::new(device.clone(), 3);
    let attention = attention();
    let context = Tensor::zeros((1, 4, 3), candle_core::DType::F32, &device)?;
    let mapped = attention.precompute(&mut graph, &context).expect("precompute");
    let mask = mask_for_lengths(&device, &[3], 3)?;
    let state = Tensor::zeros((1, 5), candle_core::DType::F32, &device)?;
    assert!(attention
        .attend(&mut graph, &state, &context, &mapped, &mask)
        .is_err());
    Ok(())
}

#[test]
fn attend_accounts_for_the_scoring_hidden_layer() -> Result<()> {
    let device = Device::Cpu;
    let mut graph = Graph::new(device.clone(), 5);
    let attention = attention();
    let (batch, src_len, attention_dim) = (3, 7, 4);

    let context = Tensor::randn(0f32, 1.0, (batch, 4, src_len), &device)?;
    let state = Tensor::randn(0f32, 1.0, (batch, 3), &device)?;
    let mask = mask_for_lengths(&device, &[7, 5, 2], src_len)?;
    let mapped = attention.precompute(&mut graph, &context).expect("precompute");

    let before = graph.node_bytes();
    attention
        .attend(&mut graph, &state, &context, &mapped, &mask)
        .expect("attend");
    let hidden_bytes = batch * src_len * attention_dim * 4;
    // Pre-activation plus tanh output, both (batch, src_len, attention_dim).
    assert!(graph.node_bytes() - before >= 2 * hidden_bytes);
    Ok(())
}
