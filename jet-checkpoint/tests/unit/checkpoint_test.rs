use super::*;
use jet_transformer::{ExecutionContext, ForwardMode, JetBatch, OutputHeadKind};
use std::fs;
use tempfile::TempDir;

fn tiny_model(output: OutputHeadKind, seed: u64) -> Result<JetTransformer> {
    let config = ModelConfig::builder()
        .hidden_dim(8)
        .num_layers(2)
        .num_heads(2)
        .num_bins(&[3, 4, 5])
        .output(output)
        .build()?;
    JetTransformerBuilder::new(config).with_seed(seed).build()
}

#[test]
fn test_checkpoint_round_trip_preserves_predictions() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let batch = JetBatch::from_sequences(&[vec![[1, 2, 3], [0, 3, 4]]], 4)?;
    let ctx = ExecutionContext::global();

    for output in [OutputHeadKind::Linear, OutputHeadKind::Product] {
        let path = temp_dir.path().join("model.bin");
        let model = tiny_model(output, 99)?;
        save_checkpoint(&model, &path)?;

        let expected_size = HEADER_SIZE + model.num_parameters() * 4;
        assert_eq!(fs::metadata(&path)?.len() as usize, expected_size);

        let restored = load_checkpoint(&path)?;
        assert_eq!(restored.config(), model.config());
        assert_eq!(restored.parameters(), model.parameters());
        assert_eq!(
            restored.forward(&ctx, &batch, &mut ForwardMode::Eval)?,
            model.forward(&ctx, &batch, &mut ForwardMode::Eval)?
        );
    }
    Ok(())
}

#[test]
fn test_truncated_checkpoint_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("model.bin");
    save_checkpoint(&tiny_model(OutputHeadKind::Linear, 1)?, &path)?;

    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() - 4])?;

    let err = load_checkpoint(&path).unwrap_err();
    assert!(err.to_string().contains("size mismatch"));
    Ok(())
}

#[test]
fn test_trailing_bytes_are_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("model.bin");
    save_checkpoint(&tiny_model(OutputHeadKind::Product, 1)?, &path)?;

    let mut bytes = fs::read(&path)?;
    bytes.extend_from_slice(&[0u8; 8]);
    fs::write(&path, &bytes)?;

    assert!(load_checkpoint(&path).is_err());
    Ok(())
}

#[test]
fn test_foreign_file_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("model.bin");
    fs::write(&path, vec![7u8; 512])?;

    assert!(load_checkpoint(&path).is_err());
    assert!(load_checkpoint(temp_dir.path().join("missing.bin")).is_err());
    Ok(())
}

#[test]
fn test_load_model_config_applies_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"hidden_dim": 32, "num_bins": [41, 31, 31], "output": "product"}"#)?;

    let config = load_model_config(&path)?;

    assert_eq!(config.hidden_dim, 32);
    assert_eq!(config.num_bins, vec![41, 31, 31]);
    assert_eq!(config.output, OutputHeadKind::Product);
    assert_eq!(config.num_layers, 10);
    assert_eq!(config.feedforward_dim(), 32);
    Ok(())
}

#[test]
fn test_load_model_config_rejects_invalid_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("config.json");

    fs::write(&path, "invalid json")?;
    assert!(load_model_config(&path).is_err());

    fs::write(&path, r#"{"num_bins": [41, 41]}"#)?;
    assert!(load_model_config(&path).is_err());

    fs::write(&path, r#"{"hidden_dim": 30, "num_heads": 4}"#)?;
    assert!(load_model_config(&path).is_err());
    Ok(())
}
