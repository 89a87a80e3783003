//! Autoregressive transformer over discretized jet constituents.
//!
//! Each jet is a sequence of particles, and every particle is a triple of
//! feature bins (pT, eta, phi). The model predicts a joint distribution over
//! all bin triples for the next particle given the previous ones. Those
//! predictions yield per-jet likelihoods for anomaly detection and drive an
//! autoregressive sampler.
//!
//! ```rust,no_run
//! use jet_transformer::{ExecutionContext, JetBatch, JetTransformerBuilder, ModelConfig, ProbabilityOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ModelConfig::builder().hidden_dim(64).num_layers(2).build()?;
//! let model = JetTransformerBuilder::new(config).with_seed(7).build()?;
//!
//! let batch = JetBatch::from_sequences(&[vec![[5, 10, 2], [3, 11, 4]]], 20)?;
//! let ctx = ExecutionContext::global();
//! let log_likelihood = model.score(&ctx, &batch, ProbabilityOptions { perplexity: false, logarithmic: true })?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod bins;
mod configuration;
mod context;
mod heads;
mod layers;
mod masks;
mod params;
mod sampler;
mod scoring;
mod tensor;
mod transformer;

pub use batch::{IGNORE_TARGET, JetBatch, padding_from_sentinels};
pub use bins::{BinCodec, PADDING_PARTICLE, Particle, SENTINEL};
pub use configuration::{ModelConfig, ModelConfigBuilder, NUM_FEATURES, OutputHeadKind};
pub use context::{ExecutionContext, ForwardMode};
pub use heads::{LinearHead, OutputHead, OutputHeads, ProductHead};
pub use layers::{Dropout, FeatureEmbeddings, FeedForward, LayerNorm, Linear, MultiHeadAttention, softmax};
pub use masks::{AttentionMasks, causal_mask};
pub use params::Parameterized;
pub use sampler::{GeneratedJets, Sampler, sample_inverse_cdf};
pub use scoring::{ProbabilityOptions, cross_entropy_loss, cross_entropy_per_token, sequence_probability};
pub use tensor::Tensor3;
pub use transformer::{CausalTransformerStack, EncoderLayer, JetTransformer, JetTransformerBuilder, PreNormEncoderLayer};
