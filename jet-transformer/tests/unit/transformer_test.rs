use super::*;
use crate::configuration::OutputHeadKind;

fn tiny_model(output: OutputHeadKind) -> Result<JetTransformer> {
    let config = ModelConfig::builder()
        .hidden_dim(8)
        .num_layers(2)
        .num_heads(2)
        .num_bins(&[3, 4, 5])
        .max_len(6)
        .output(output)
        .build()?;
    JetTransformerBuilder::new(config).with_seed(42).build()
}

#[test]
fn test_forward_shape_for_both_heads() -> Result<()> {
    let batch = JetBatch::from_sequences(&[vec![[0, 1, 2], [2, 3, 4]], vec![[1, 0, 0]]], 4)?;
    let ctx = ExecutionContext::global();

    for output in [OutputHeadKind::Linear, OutputHeadKind::Product] {
        let model = tiny_model(output)?;
        let logits = model.forward(&ctx, &batch, &mut ForwardMode::Eval)?;

        assert_eq!(logits.shape(), (2, 4, 60));
        assert_eq!(model.total_bins(), 60);
        assert!(logits.data.iter().all(|v| v.is_finite()));
    }
    Ok(())
}

#[test]
fn test_earlier_positions_ignore_later_particles() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let ctx = ExecutionContext::global();

    let first = JetBatch::from_sequences(&[vec![[1, 1, 1], [0, 2, 3]]], 2)?;
    let second = JetBatch::from_sequences(&[vec![[1, 1, 1], [2, 0, 4]]], 2)?;

    let first_logits = model.forward(&ctx, &first, &mut ForwardMode::Eval)?;
    let second_logits = model.forward(&ctx, &second, &mut ForwardMode::Eval)?;

    assert_eq!(first_logits.row(0, 0), second_logits.row(0, 0));
    assert_ne!(first_logits.row(0, 1), second_logits.row(0, 1));
    Ok(())
}

#[test]
fn test_trailing_padding_keeps_valid_logits() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Product)?;
    let ctx = ExecutionContext::global();
    let sequence = vec![[1, 2, 3], [0, 0, 1], [2, 3, 0]];

    let short = model.forward(&ctx, &JetBatch::from_sequences(&[sequence.clone()], 3)?, &mut ForwardMode::Eval)?;
    let long = model.forward(&ctx, &JetBatch::from_sequences(&[sequence], 6)?, &mut ForwardMode::Eval)?;

    for pos in 0..3 {
        for (a, b) in short.row(0, pos).iter().zip(long.row(0, pos)) {
            assert!((a - b).abs() < 1e-5, "position {pos}: {a} != {b}");
        }
    }
    Ok(())
}

#[test]
fn test_out_of_range_bins_are_rejected() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let batch = JetBatch::from_sequences(&[vec![[3, 0, 0]]], 2)?;

    assert!(model.forward(&ExecutionContext::global(), &batch, &mut ForwardMode::Eval).is_err());
    Ok(())
}

#[test]
fn test_same_seed_builds_same_model() -> Result<()> {
    let first = tiny_model(OutputHeadKind::Product)?;
    let second = tiny_model(OutputHeadKind::Product)?;

    assert_eq!(first.parameters(), second.parameters());
    Ok(())
}

#[test]
fn test_parameter_layout() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let params = model.parameters();
    let names: Vec<&str> = params.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names.first(), Some(&"embeddings.feature_0"));
    assert!(names.contains(&"layers.1.attention.wq.weight"));
    assert!(names.contains(&"layers.0.feed_forward.w2.bias"));
    assert_eq!(names.last(), Some(&"head.proj.bias"));

    // Embeddings 12 * 8, two layers, final norm 2 * 8, head 8 * 60 + 60.
    let per_layer = 2 * 2 * 8 + 4 * (8 * 8 + 8) + 2 * (8 * 8 + 8);
    assert_eq!(model.num_parameters(), 12 * 8 + 2 * per_layer + 2 * 8 + 8 * 60 + 60);
    Ok(())
}

#[test]
fn test_dedicated_pool_matches_global_pool() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let batch = JetBatch::from_sequences(&[vec![[1, 2, 3], [2, 3, 4]], vec![[0, 0, 0]]], 3)?;

    let global = model.forward(&ExecutionContext::global(), &batch, &mut ForwardMode::Eval)?;
    let pooled = model.forward(&ExecutionContext::with_threads(2)?, &batch, &mut ForwardMode::Eval)?;

    assert_eq!(global, pooled);
    Ok(())
}

#[test]
fn test_training_mode_applies_dropout() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Linear)?;
    let batch = JetBatch::from_sequences(&[vec![[1, 2, 3], [2, 3, 4]]], 2)?;
    let ctx = ExecutionContext::global();
    let mut rng = ChaCha8Rng::seed_from_u64(9);

    let eval = model.forward(&ctx, &batch, &mut ForwardMode::Eval)?;
    let eval_again = model.forward(&ctx, &batch, &mut ForwardMode::Eval)?;
    let train = model.forward(&ctx, &batch, &mut ForwardMode::Train(&mut rng))?;

    assert_eq!(eval, eval_again);
    assert_ne!(eval, train);
    Ok(())
}

#[test]
fn test_embed_shape() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Product)?;
    let batch = JetBatch::from_sequences(&[vec![[1, 2, 3]]], 3)?;

    let emb = model.embed(&ExecutionContext::global(), &batch)?;
    assert_eq!(emb.shape(), (1, 3, 8));
    Ok(())
}

#[test]
fn test_product_model_rows_are_distributions() -> Result<()> {
    let model = tiny_model(OutputHeadKind::Product)?;
    let batch = JetBatch::from_sequences(&[vec![[0, 1, 2], [2, 3, 4], [1, 0, 3]], vec![[1, 1, 1]]], 4)?;
    let logits = model.forward(&ExecutionContext::global(), &batch, &mut ForwardMode::Eval)?;

    for batch_idx in 0..2 {
        for pos in 0..4 {
            let mut probs = logits.row(batch_idx, pos).to_vec();
            crate::layers::softmax(&mut probs);
            assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5, "row ({batch_idx}, {pos})");
        }
    }
    Ok(())
}
