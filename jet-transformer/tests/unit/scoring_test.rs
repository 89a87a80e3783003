use super::*;
use crate::configuration::{ModelConfig, OutputHeadKind};
use crate::transformer::JetTransformerBuilder;

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
}

/// Two-bin logits over three positions: p(bin 0) is 0.5 at step 0 and 0.75 at step 1.
fn handcrafted_logits() -> Tensor3 {
    Tensor3::from_vec(vec![0.0, 0.0, 3f32.ln(), 0.0, 0.0, 0.0], 1, 3, 2)
}

fn tiny_model(output: OutputHeadKind) -> Result<JetTransformer> {
    let config = ModelConfig::builder()
        .hidden_dim(8)
        .num_layers(2)
        .num_heads(2)
        .num_bins(&[3, 4, 5])
        .output(output)
        .build()?;
    JetTransformerBuilder::new(config).with_seed(3).build()
}

#[test]
fn test_cross_entropy_of_uniform_logits() -> Result<()> {
    let logits = Tensor3::zeros(1, 2, 2);
    let loss = cross_entropy_loss(&logits, &[0, 1])?;

    assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_loss_ignores_padded_targets() -> Result<()> {
    let logits = handcrafted_logits();
    let loss = cross_entropy_loss(&logits, &[0, 1, IGNORE_TARGET])?;
    let per_token = cross_entropy_per_token(&logits, &[0, 1, IGNORE_TARGET])?;

    assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
    assert_eq!(per_token.len(), 2);
    assert_eq!(per_token[1], 0.0);
    Ok(())
}

#[test]
fn test_single_particle_sequences() -> Result<()> {
    let logits = Tensor3::zeros(2, 1, 4);
    let targets = [3, 1];
    let mask = [true, true];

    assert_eq!(cross_entropy_loss(&logits, &targets)?, 0.0);
    assert!(cross_entropy_per_token(&logits, &targets)?.is_empty());

    let product = sequence_probability(&logits, &mask, &targets, ProbabilityOptions::default())?;
    let log_sum =
        sequence_probability(&logits, &mask, &targets, ProbabilityOptions { perplexity: false, logarithmic: true })?;
    assert_eq!(product, vec![1.0, 1.0]);
    assert_eq!(log_sum, vec![0.0, 0.0]);
    Ok(())
}

#[test]
fn test_sequence_probability_aggregations() -> Result<()> {
    let logits = handcrafted_logits();
    let targets = [0, 1, 0];
    let mask = [true; 3];

    let product = sequence_probability(&logits, &mask, &targets, ProbabilityOptions::default())?;
    assert_close(product[0], 0.375);

    let log_sum =
        sequence_probability(&logits, &mask, &targets, ProbabilityOptions { perplexity: false, logarithmic: true })?;
    assert_close(log_sum[0], 0.375f64.ln());

    let perplexity =
        sequence_probability(&logits, &mask, &targets, ProbabilityOptions { perplexity: true, logarithmic: false })?;
    assert_close(perplexity[0], 0.375f64.powf(1.0 / 3.0));
    Ok(())
}

#[test]
fn test_padded_steps_count_as_certain() -> Result<()> {
    let logits = handcrafted_logits();
    let probs =
        sequence_probability(&logits, &[true, true, false], &[0, 1, IGNORE_TARGET], ProbabilityOptions::default())?;

    assert_close(probs[0], 0.5);
    Ok(())
}

#[test]
fn test_invalid_targets_are_rejected() {
    let logits = Tensor3::zeros(1, 2, 2);

    assert!(cross_entropy_loss(&logits, &[0]).is_err());
    assert!(cross_entropy_loss(&logits, &[0, 2]).is_err());
    assert!(sequence_probability(&logits, &[true], &[0, 1], ProbabilityOptions::default()).is_err());
}

#[test]
fn test_padding_does_not_change_model_score() -> Result<()> {
    let ctx = ExecutionContext::global();
    let sequence = vec![[1, 2, 3], [0, 3, 1], [2, 0, 4]];
    let options = ProbabilityOptions { perplexity: false, logarithmic: true };

    for output in [OutputHeadKind::Linear, OutputHeadKind::Product] {
        let model = tiny_model(output)?;
        let exact = model.score(&ctx, &JetBatch::from_sequences(&[sequence.clone()], 3)?, options)?;
        let padded = model.score(&ctx, &JetBatch::from_sequences(&[sequence.clone()], 8)?, options)?;

        assert!((exact[0] - padded[0]).abs() < 1e-4, "{exact:?} != {padded:?}");
        assert!(exact[0] < 0.0);
    }
    Ok(())
}

#[test]
fn test_model_loss_matches_per_token_mean() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let batch = JetBatch::from_sequences(&[vec![[1, 2, 3], [0, 3, 1]], vec![[2, 2, 2], [1, 1, 1], [0, 0, 0]]], 3)?;
    let logits = model.forward(&ExecutionContext::global(), &batch, &mut ForwardMode::Eval)?;

    let loss = model.loss(&logits, &batch)?;
    let per_token = model.loss_per_token(&logits, &batch)?;

    assert_eq!(per_token.len(), 2 * 2);
    assert!(loss > 0.0);
    assert!((loss - per_token.iter().sum::<f32>() / 3.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_padded_context_steps_count_as_certain() -> Result<()> {
    let logits = handcrafted_logits();
    let probs = sequence_probability(&logits, &[true, false, true], &[0, IGNORE_TARGET, 0], ProbabilityOptions::default())?;

    assert_close(probs[0], 1.0);
    Ok(())
}

#[test]
fn test_padded_position_contents_do_not_leak_into_scores() -> Result<()> {
    let ctx = ExecutionContext::global();
    let model = tiny_model(OutputHeadKind::Product)?;
    let mask = vec![true, false, true];
    let first = JetBatch::new(vec![[1, 2, 3], [0, 0, 0], [2, 1, 0]], mask.clone(), 1, 3)?;
    let second = JetBatch::new(vec![[1, 2, 3], [2, 3, 4], [2, 1, 0]], mask, 1, 3)?;
    let options = ProbabilityOptions { perplexity: false, logarithmic: true };

    assert_eq!(model.score(&ctx, &first, options)?, model.score(&ctx, &second, options)?);
    assert_eq!(model.score(&ctx, &first, options)?, vec![0.0]);

    let first_logits = model.forward(&ctx, &first, &mut ForwardMode::Eval)?;
    let second_logits = model.forward(&ctx, &second, &mut ForwardMode::Eval)?;
    assert_eq!(model.loss(&first_logits, &first)?, 0.0);
    assert_eq!(model.loss_per_token(&first_logits, &first)?, model.loss_per_token(&second_logits, &second)?);
    Ok(())
}
