use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::optim::{Optimizer, SGD};
use layers::Graph;
use model::{
    AttentionDecoder, CorpusBatch, Decoder, EncoderDecoder, ModelConfig, ModelError, Nematus,
    PlainDecoder, RecurrentEncoder,
};
use tempfile::tempdir;

fn tiny_config() -> ModelConfig {
    ModelConfig {
        dim_vocabs: vec![11, 13],
        dim_emb: 6,
        dim_pos: 2,
        dim_rnn: 5,
        max_length: 12,
        seed: 7,
    }
}

fn nematus(seed: u64) -> Result<Nematus> {
    Ok(Nematus::new(tiny_config(), Graph::new(Device::Cpu, seed))?)
}

fn sample_batch() -> Result<CorpusBatch> {
    Ok(CorpusBatch::from_sentences(&[
        vec![vec![1, 2, 3, 4], vec![5, 6, 7]],
        vec![vec![8, 9], vec![10, 1, 2, 3]],
        vec![vec![4, 4, 5], vec![12]],
    ])?)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.max_all()?.to_scalar::<f32>()?)
}

#[test]
fn synthetic_batch_loss_decreases_after_one_update() -> Result<()> {
    let mut model = nematus(42)?;
    let batch = CorpusBatch::fake(&[10, 10], 4)?;

    let loss = model.build(&batch)?;
    let before = loss.to_scalar::<f32>()?;
    assert!(before.is_finite());

    let mut optimizer = SGD::new(model.graph().vars(), 0.1)?;
    optimizer.backward_step(&loss)?;

    let after = model.build(&batch)?.to_scalar::<f32>()?;
    assert!(after.is_finite());
    assert!(after < before, "loss went from {before} to {after}");
    Ok(())
}

#[test]
fn save_then_load_reproduces_logits() -> Result<()> {
    let dir = tempdir()?;
    let batch = sample_batch()?;

    for file in ["model.npz", "model.safetensors"] {
        let path = dir.path().join(file);
        let mut original = nematus(1)?;
        let expected = original.forward(&batch)?;
        original.save(&path, true)?;
        assert!(model::config_side_path(&path).exists());

        let mut restored = nematus(99)?;
        restored.load(&path)?;
        let actual = restored.forward(&batch)?;

        let expected = expected.logits().expect("logits");
        let actual = actual.logits().expect("logits");
        assert_eq!(expected.dims(), &[3, 4, 13]);
        assert!(max_abs_diff(expected, actual)? < 1e-6);

        let config = Nematus::load_config(&path)?.expect("side file");
        assert_eq!(&config, original.config());
    }
    Ok(())
}

#[test]
fn loading_an_incomplete_roster_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("uni.npz");
    let mut unidirectional: EncoderDecoder<RecurrentEncoder, AttentionDecoder> =
        EncoderDecoder::new(tiny_config(), Graph::new(Device::Cpu, 3))?;
    unidirectional.save(&path, false)?;

    let mut bidirectional = nematus(3)?;
    let err = bidirectional.load(&path).unwrap_err();
    assert!(matches!(err, ModelError::Checkpoint { .. }));
    assert!(err.to_string().contains("encoder_r_"));
    Ok(())
}

#[test]
fn ground_truth_shifts_targets_by_one() -> Result<()> {
    let mut model = nematus(5)?;
    model.initialize_parameters()?;
    let batch = sample_batch()?;
    let mut state = model.start_state(&batch)?;

    let mut scratch = Graph::new(Device::Cpu, 0);
    for name in model.graph().parameter_names() {
        scratch.assign(name, &model.graph().get(name).expect("parameter"))?;
    }
    let target = batch.target();
    let unshifted = model
        .decoder()
        .embeddings()
        .forward(&mut scratch, target.indices(), target.batch_size())?;
    let targets = model
        .decoder()
        .ground_truth(&mut scratch, &mut state, &batch)?;
    let shifted = state.target_embeddings().expect("embeddings");

    assert_eq!(shifted.dims(), &[3, 8, 4]);
    let first = shifted.narrow(2, 0, 1)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert_eq!(first, 0.0);
    assert!(max_abs_diff(&shifted.narrow(2, 1, 3)?, &unshifted.narrow(2, 0, 3)?)? < 1e-7);
    assert_eq!(
        targets.indices.to_vec2::<u32>()?,
        vec![vec![5, 6, 7, 0], vec![10, 1, 2, 3], vec![12, 0, 0, 0]]
    );
    assert_eq!(
        targets.mask.to_vec2::<f32>()?,
        vec![
            vec![1.0, 1.0, 1.0, 0.0],
            vec![1.0, 1.0, 1.0, 1.0],
            vec![1.0, 0.0, 0.0, 0.0]
        ]
    );
    Ok(())
}

#[test]
fn empty_selection_is_a_zero_embedding() -> Result<()> {
    let mut model = nematus(5)?;
    let batch = sample_batch()?;
    let mut state = model.start_state(&batch)?;
    model.select_embeddings(&mut state, &[], 0)?;

    let embeddings = state.target_embeddings().expect("embeddings");
    assert_eq!(embeddings.dims(), &[3, 8, 1]);
    let values = embeddings.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| *v == 0.0));
    Ok(())
}

#[test]
fn attention_weights_are_normalised_and_skip_padding() -> Result<()> {
    let mut model = nematus(8)?;
    let batch = sample_batch()?;
    let state = model.forward(&batch)?;
    let attention = state.attention().expect("attention weights");
    assert_eq!(attention.dims(), &[3, 4, 4]);

    let weights = attention.to_vec3::<f32>()?;
    for row in weights.iter().flatten() {
        let total: f32 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
    // Source lengths are 4, 2 and 3.
    for row in &weights[1] {
        assert_eq!(row[2], 0.0);
        assert_eq!(row[3], 0.0);
    }
    for row in &weights[2] {
        assert_eq!(row[3], 0.0);
        assert!(row[2] > 0.0);
    }
    Ok(())
}

#[test]
fn search_steps_broadcast_the_encoder_over_hypotheses() -> Result<()> {
    let mut model = nematus(13)?;
    let batch = CorpusBatch::from_sentences(&[vec![vec![1, 2, 3], vec![4]]])?;

    let mut state = model.start_state(&batch)?;
    model.select_embeddings(&mut state, &[], 0)?;
    let first = model.step(&state)?;
    assert_eq!(first.logits().expect("logits").dims(), &[1, 1, 13]);
    assert_eq!(first.log_probs()?.dims(), &[1, 1, 13]);

    let mut expanded = first.select_hypotheses(&[0, 0, 0])?;
    model.select_embeddings(&mut expanded, &[2, 5, 7], 1)?;
    let second = model.step(&expanded)?;
    assert_eq!(second.logits().expect("logits").dims(), &[3, 1, 13]);
    assert_eq!(second.hidden().dims(), &[3, 5]);
    assert!(first.select_hypotheses(&[1]).is_err());
    Ok(())
}

#[test]
fn plain_decoder_and_unidirectional_encoder_train() -> Result<()> {
    let mut model: EncoderDecoder<RecurrentEncoder, PlainDecoder> =
        EncoderDecoder::new(tiny_config(), Graph::new(Device::Cpu, 2))?;
    let output = model.build_with_metrics(&sample_batch()?)?;
    assert!(output.metrics.average_loss().is_finite());
    assert_eq!(output.metrics.total_tokens(), 8);
    assert!(model.forward(&sample_batch()?)?.attention().is_none());
    assert_eq!(model.decoder().embeddings().width(), 8);
    Ok(())
}

#[test]
fn fits_reflects_the_workspace() -> Result<()> {
    let graph = Graph::new(Device::Cpu, 1).with_workspace(512 * 1024);
    let mut model = Nematus::new(tiny_config(), graph)?;
    model.build(&CorpusBatch::fake(&[4, 4], 2)?)?;
    assert!(model.fits());
    model.build(&CorpusBatch::fake(&[12, 12], 256)?)?;
    assert!(!model.fits());
    Ok(())
}

#[test]
fn build_accounts_for_every_attention_hidden_layer() -> Result<()> {
    let mut model = nematus(3)?;
    let (rows, width) = (3, 6);
    model.build(&CorpusBatch::fake(&[width, width], rows)?)?;

    // One tanh(mapped + query) of (rows, source, attention) per target step,
    // with attention width equal to the bidirectional context width.
    let attention_dim = 2 * tiny_config().dim_rnn;
    let hidden_layers = rows * width * attention_dim * width * 4;
    let log_probs = rows * width * tiny_config().target_vocab() * 4;
    assert!(
        model.graph().node_bytes() >= hidden_layers + log_probs,
        "accounted {} bytes",
        model.graph().node_bytes()
    );
    Ok(())
}

#[test]
fn empty_source_sentence_is_rejected_before_building() {
    let err = CorpusBatch::from_sentences(&[vec![vec![1, 2], vec![3, 4]], vec![vec![], vec![5]]])
        .unwrap_err();
    assert!(matches!(err, ModelError::Batch(_)), "{err}");
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = ModelConfig {
        dim_vocabs: vec![10],
        ..tiny_config()
    };
    let err = Nematus::new(config, Graph::new(Device::Cpu, 0)).unwrap_err();
    assert!(matches!(err, ModelError::Config(_)));
}
