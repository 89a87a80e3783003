#[cfg(test)]
#[path = "../tests/unit/transformer_test.rs"]
mod transformer_test;

use crate::batch::JetBatch;
use crate::bins::BinCodec;
use crate::configuration::{ModelConfig, NUM_FEATURES};
use crate::context::{ExecutionContext, ForwardMode};
use crate::heads::{OutputHead, OutputHeads};
use crate::layers::{Dropout, FeatureEmbeddings, FeedForward, LayerNorm, MultiHeadAttention};
use crate::masks::AttentionMasks;
use crate::params::{Parameterized, with_prefix};
use crate::tensor::Tensor3;
use anyhow::Result;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One layer of the stack: `transform(embedding, masks) -> embedding`.
pub trait EncoderLayer: Parameterized + Send + Sync + std::fmt::Debug {
    fn transform(&self, x: Tensor3, masks: &AttentionMasks, mode: &mut ForwardMode<'_>) -> Tensor3;
}

/// Pre-norm encoder layer
///
/// **Structure**:
/// ```text
/// x = x + Dropout(Attention(LayerNorm(x)))
/// x = x + Dropout(FFN(LayerNorm(x)))
/// ```
pub struct PreNormEncoderLayer {
    pub attn_norm: LayerNorm,
    pub attention: MultiHeadAttention,
    pub attn_dropout: Dropout,
    pub ffn_norm: LayerNorm,
    pub feed_forward: FeedForward,
    pub ffn_dropout: Dropout,
}

impl PreNormEncoderLayer {
    pub fn new<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Self {
        let dim = config.hidden_dim;
        Self {
            attn_norm: LayerNorm::new(dim, config.layer_norm_eps),
            attention: MultiHeadAttention::new(dim, config.num_heads, config.dropout, rng),
            attn_dropout: Dropout::new(config.dropout),
            ffn_norm: LayerNorm::new(dim, config.layer_norm_eps),
            feed_forward: FeedForward::new(dim, config.feedforward_dim(), config.dropout, rng),
            ffn_dropout: Dropout::new(config.dropout),
        }
    }
}

impl EncoderLayer for PreNormEncoderLayer {
    fn transform(&self, mut x: Tensor3, masks: &AttentionMasks, mode: &mut ForwardMode<'_>) -> Tensor3 {
        // Attention block with residual connection
        let normed = self.attn_norm.forward(&x);
        let mut delta = self.attention.forward(&normed, masks, mode);
        self.attn_dropout.apply(&mut delta.data, mode);
        x.add_assign(&delta);

        // Feed-forward block with residual connection
        let normed = self.ffn_norm.forward(&x);
        let mut delta = self.feed_forward.forward(&normed, mode);
        self.ffn_dropout.apply(&mut delta.data, mode);
        x.add_assign(&delta);

        x
    }
}

impl Parameterized for PreNormEncoderLayer {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        let mut params = with_prefix("attn_norm", self.attn_norm.parameters());
        params.extend(with_prefix("attention", self.attention.parameters()));
        params.extend(with_prefix("ffn_norm", self.ffn_norm.parameters()));
        params.extend(with_prefix("feed_forward", self.feed_forward.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        let mut params = with_prefix("attn_norm", self.attn_norm.parameters_mut());
        params.extend(with_prefix("attention", self.attention.parameters_mut()));
        params.extend(with_prefix("ffn_norm", self.ffn_norm.parameters_mut()));
        params.extend(with_prefix("feed_forward", self.feed_forward.parameters_mut()));
        params
    }
}

impl std::fmt::Debug for PreNormEncoderLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreNormEncoderLayer")
            .field("attn_norm", &self.attn_norm)
            .field("attention", &self.attention)
            .field("ffn_norm", &self.ffn_norm)
            .field("feed_forward", &self.feed_forward)
            .finish()
    }
}

/// Ordered layers applied one after another under the same masks.
pub struct CausalTransformerStack {
    layers: Vec<Box<dyn EncoderLayer>>,
}

impl CausalTransformerStack {
    pub fn new(layers: Vec<Box<dyn EncoderLayer>>) -> Self {
        Self { layers }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn forward(&self, x: Tensor3, masks: &AttentionMasks, mode: &mut ForwardMode<'_>) -> Tensor3 {
        self.layers.iter().fold(x, |emb, layer| layer.transform(emb, masks, mode))
    }
}

impl Parameterized for CausalTransformerStack {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| with_prefix(&format!("layers.{idx}"), layer.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        self.layers
            .iter_mut()
            .enumerate()
            .flat_map(|(idx, layer)| with_prefix(&format!("layers.{idx}"), layer.parameters_mut()))
            .collect()
    }
}

impl std::fmt::Debug for CausalTransformerStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct LayersSummary<'a, T>(&'a [T]);

        impl<T: std::fmt::Debug> std::fmt::Debug for LayersSummary<'_, T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().take(1))
                    .entry(&format_args!("... and {} more", self.0.len().saturating_sub(1)))
                    .finish()
            }
        }

        f.debug_struct("CausalTransformerStack").field("layers", &LayersSummary(&self.layers)).finish()
    }
}

/// Autoregressive transformer over discretized jet constituents
///
/// **Process Flow:**
/// 1. **Bin Embedding**: Sum of per-feature embeddings of the clamped bins
/// 2. **Causal Stack**: Pre-norm encoder layers under causal and padding masks
/// 3. **Final Normalization**: LayerNorm followed by dropout
/// 4. **Output Head**: Logits over the joint bin space for the next particle
///
/// Logits at position `i` describe the particle at position `i + 1`.
pub struct JetTransformer {
    config: ModelConfig,
    codec: BinCodec,
    embeddings: FeatureEmbeddings,
    stack: CausalTransformerStack,
    out_norm: LayerNorm,
    out_dropout: Dropout,
    head: OutputHeads,
}

impl JetTransformer {
    /// Builds a randomly initialized model, failing on an invalid configuration.
    pub fn new<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let num_bins = config.bins()?;

        let embeddings = FeatureEmbeddings::new(num_bins, config.hidden_dim, rng);
        let layers = (0..config.num_layers)
            .map(|_| Box::new(PreNormEncoderLayer::new(&config, rng)) as Box<dyn EncoderLayer>)
            .collect();
        let head = OutputHeads::from_config(&config, rng)?;

        let model = Self {
            codec: BinCodec::new(num_bins)?,
            embeddings,
            stack: CausalTransformerStack::new(layers),
            out_norm: LayerNorm::new(config.hidden_dim, config.layer_norm_eps),
            out_dropout: Dropout::new(config.dropout),
            head,
            config,
        };

        debug!("Bins: {}, parameters: {}", model.codec.total_bins(), model.num_parameters());
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn codec(&self) -> &BinCodec {
        &self.codec
    }

    pub fn total_bins(&self) -> usize {
        self.head.total_bins()
    }

    /// Runs the full model and returns unnormalized logits of shape [batch, seq_len, total_bins].
    pub fn forward(&self, ctx: &ExecutionContext, batch: &JetBatch, mode: &mut ForwardMode<'_>) -> Result<Tensor3> {
        batch.validate_bins(&self.codec.num_bins())?;
        let masks = AttentionMasks::new(&batch.padding_mask, batch.batch, batch.seq_len)?;
        let particles = batch.clamped();

        Ok(ctx.install(|| self.forward_inner(&particles, &masks, mode)))
    }

    /// Contextual embeddings after the final normalization, before the head.
    pub fn embed(&self, ctx: &ExecutionContext, batch: &JetBatch) -> Result<Tensor3> {
        batch.validate_bins(&self.codec.num_bins())?;
        let masks = AttentionMasks::new(&batch.padding_mask, batch.batch, batch.seq_len)?;
        let particles = batch.clamped();

        Ok(ctx.install(|| {
            let emb = self.embeddings.forward(&particles, masks.batch, masks.seq_len);
            let emb = self.stack.forward(emb, &masks, &mut ForwardMode::Eval);
            self.out_norm.forward(&emb)
        }))
    }

    fn forward_inner(
        &self,
        particles: &[[usize; NUM_FEATURES]],
        masks: &AttentionMasks,
        mode: &mut ForwardMode<'_>,
    ) -> Tensor3 {
        let emb = self.embeddings.forward(particles, masks.batch, masks.seq_len);
        let emb = self.stack.forward(emb, masks, mode);

        let mut emb = self.out_norm.forward(&emb);
        self.out_dropout.apply(&mut emb.data, mode);

        self.head.forward(&emb)
    }
}

impl Parameterized for JetTransformer {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        let mut params = with_prefix("embeddings", self.embeddings.parameters());
        params.extend(self.stack.parameters());
        params.extend(with_prefix("out_norm", self.out_norm.parameters()));
        params.extend(with_prefix("head", self.head.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        let mut params = with_prefix("embeddings", self.embeddings.parameters_mut());
        params.extend(self.stack.parameters_mut());
        params.extend(with_prefix("out_norm", self.out_norm.parameters_mut()));
        params.extend(with_prefix("head", self.head.parameters_mut()));
        params
    }
}

impl std::fmt::Debug for JetTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetTransformer")
            .field("config", &self.config)
            .field("embeddings", &self.embeddings)
            .field("stack", &self.stack)
            .field("out_norm", &self.out_norm)
            .field("head", &self.head)
            .finish()
    }
}

/// Builder pattern for creating seeded jet transformers
pub struct JetTransformerBuilder {
    config: ModelConfig,
    seed: u64,
}

impl JetTransformerBuilder {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, seed: 0 }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<JetTransformer> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let model = JetTransformer::new(self.config, &mut rng)?;
        debug!("{model:#?}");
        Ok(model)
    }
}
