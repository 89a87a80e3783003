//! # jet-checkpoint
//!
//! Persistence for jet-transformer models: a compact binary checkpoint format
//! and JSON model configurations.
//!
//! A checkpoint starts with a [`HEADER_SIZE`]-byte little-endian header
//! (magic number, version, hyper-parameters) followed by every parameter of
//! the model as little-endian f32, in [`jet_transformer::Parameterized`] order.
//!
//! ```rust,no_run
//! use jet_checkpoint::{load_checkpoint, load_model_config, save_checkpoint};
//! use jet_transformer::JetTransformerBuilder;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = load_model_config("config.json")?;
//! let model = JetTransformerBuilder::new(config).with_seed(42).build()?;
//!
//! save_checkpoint(&model, "model.bin")?;
//! let restored = load_checkpoint("model.bin")?;
//! # Ok(())
//! # }
//! ```

mod checkpoint;
mod header;
mod utils;

pub use checkpoint::{load_checkpoint, load_model_config, save_checkpoint};
pub use header::{CHECKPOINT_MAGIC, CHECKPOINT_VERSION, HEADER_SIZE, parse_header, write_header};
