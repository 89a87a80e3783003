#[cfg(test)]
#[path = "../tests/unit/checkpoint_test.rs"]
mod checkpoint_test;

use crate::header::{HEADER_SIZE, read_header, write_header};
use crate::utils::MemoryMapper;
use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use jet_transformer::{JetTransformer, JetTransformerBuilder, ModelConfig, Parameterized};
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes `model` as a header followed by every parameter in storage order, as little-endian f32.
pub fn save_checkpoint(model: &JetTransformer, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create checkpoint {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    write_header(&mut writer, model.config())?;

    let params = model.parameters();
    for (name, values) in &params {
        debug!("Writing {name}: {} values", values.len());
        values.iter().try_for_each(|&value| writer.write_f32::<LittleEndian>(value))?;
    }
    writer.flush()?;

    info!("💾 Written checkpoint with {} parameters to {}", model.num_parameters(), path.display());
    Ok(())
}

/// Restores a model written by [`save_checkpoint`].
///
/// Fails on a foreign or corrupt file: wrong magic number or version, an
/// invalid configuration, or a size that does not match the configuration.
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<JetTransformer> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open checkpoint {}", path.display()))?;
    let mut mapper = MemoryMapper::new(file)?;

    let config = read_header(&mut mapper).with_context(|| format!("Failed to read header of {}", path.display()))?;
    let mut model = JetTransformerBuilder::new(config).build()?;

    let expected = HEADER_SIZE + model.num_parameters() * std::mem::size_of::<f32>();
    if mapper.len() != expected {
        anyhow::bail!("Checkpoint size mismatch: expected {} bytes, found {}", expected, mapper.len());
    }

    for (name, values) in model.parameters_mut() {
        mapper.read_f32_into(values).with_context(|| format!("Failed to read parameter {name}"))?;
    }

    info!("📦 Loaded checkpoint {} ({} parameters)", path.display(), model.num_parameters());
    Ok(model)
}

/// Loads a model configuration from a JSON file; missing fields take their defaults.
pub fn load_model_config(path: impl AsRef<Path>) -> Result<ModelConfig> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to open config at {}", path.display()))?;

    let config: ModelConfig =
        serde_json::from_str(&contents).map_err(|err| anyhow::anyhow!("Failed to parse {}: {}", path.display(), err))?;
    config.validate().with_context(|| format!("Invalid model configuration in {}", path.display()))?;

    debug!("{config:#?}");
    Ok(config)
}
