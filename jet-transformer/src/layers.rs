#[cfg(test)]
#[path = "../tests/unit/layers_test.rs"]
mod layers_test;

use crate::configuration::NUM_FEATURES;
use crate::context::ForwardMode;
use crate::masks::AttentionMasks;
use crate::params::{Parameterized, standard_normal, uniform, with_prefix};
use crate::tensor::{Tensor3, dot, matmul};
use rand::Rng;
use rayon::prelude::*;

/// Softplus switches to the identity above this input, as `ln(1 + e^x) ≈ x`.
const SOFTPLUS_THRESHOLD: f32 = 20.0;

/// Bin embedding bank - one lookup table per feature
///
/// **Purpose**: Maps each discrete feature bin to a dense vector; the
/// embedding of a particle is the sum of its per-feature embeddings.
/// **Shape**: feature `f` owns a table of [num_bins[f], dim]
pub struct FeatureEmbeddings {
    pub tables: Vec<Vec<f32>>,
    pub num_bins: [usize; NUM_FEATURES],
    pub dim: usize,
}

impl FeatureEmbeddings {
    pub fn new<R: Rng + ?Sized>(num_bins: [usize; NUM_FEATURES], dim: usize, rng: &mut R) -> Self {
        let tables = num_bins.iter().map(|&bins| standard_normal(rng, bins * dim)).collect();
        Self { tables, num_bins, dim }
    }

    /// Embeds clamped particles laid out as [batch, seq_len].
    ///
    /// Callers guarantee every bin is below its feature's bin count.
    pub fn forward(&self, particles: &[[usize; NUM_FEATURES]], batch: usize, seq_len: usize) -> Tensor3 {
        debug_assert_eq!(particles.len(), batch * seq_len);

        let mut output = Tensor3::zeros(batch, seq_len, self.dim);
        output.par_rows_mut().zip(particles.par_iter()).for_each(|(out, particle)| {
            for (table, &bin) in self.tables.iter().zip(particle.iter()) {
                let embedding = &table[bin * self.dim..(bin + 1) * self.dim];
                out.iter_mut().zip(embedding).for_each(|(o, &e)| *o += e);
            }
        });

        output
    }
}

impl Parameterized for FeatureEmbeddings {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        self.tables.iter().enumerate().map(|(idx, table)| (format!("feature_{idx}"), table.as_slice())).collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        self.tables
            .iter_mut()
            .enumerate()
            .map(|(idx, table)| (format!("feature_{idx}"), table.as_mut_slice()))
            .collect()
    }
}

impl std::fmt::Debug for FeatureEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureEmbeddings").field("num_bins", &self.num_bins).field("dim", &self.dim).finish()
    }
}

/// Layer Normalization
///
/// **Mathematical Formula**:
/// ```text
/// LayerNorm(x) = (x - mean(x)) / sqrt(var(x) + ε) * γ + β
/// ```
pub struct LayerNorm {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        Self { weight: vec![1.0; dim], bias: vec![0.0; dim], eps }
    }

    pub fn forward_row(&self, output: &mut [f32], input: &[f32]) {
        debug_assert_eq!(output.len(), input.len());
        debug_assert_eq!(input.len(), self.weight.len());

        let n = input.len() as f32;
        let mean = input.iter().sum::<f32>() / n;
        let variance = input.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
        let inv_std = (variance + self.eps).sqrt().recip();

        output.iter_mut().zip(input.iter()).zip(self.weight.iter().zip(self.bias.iter())).for_each(
            |((out, &inp), (&w, &b))| {
                *out = (inp - mean) * inv_std * w + b;
            },
        );
    }

    pub fn forward(&self, x: &Tensor3) -> Tensor3 {
        x.map_rows(x.dim, |out, inp| self.forward_row(out, inp))
    }
}

impl Parameterized for LayerNorm {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        vec![("weight".to_string(), self.weight.as_slice()), ("bias".to_string(), self.bias.as_slice())]
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        vec![("weight".to_string(), self.weight.as_mut_slice()), ("bias".to_string(), self.bias.as_mut_slice())]
    }
}

impl std::fmt::Debug for LayerNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerNorm").field("dim", &self.weight.len()).field("eps", &self.eps).finish()
    }
}

/// Fully connected layer: `y = W x + b`
///
/// **Shape**: weight [out_features, in_features], bias [out_features]
pub struct Linear {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Weights and biases drawn from U(-1/√in, 1/√in).
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = (in_features as f32).sqrt().recip();
        Self {
            weight: uniform(rng, in_features * out_features, bound),
            bias: uniform(rng, out_features, bound),
            in_features,
            out_features,
        }
    }

    /// Xavier-uniform weights and zero biases.
    pub fn xavier<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = (6.0 / (in_features + out_features) as f32).sqrt();
        Self {
            weight: uniform(rng, in_features * out_features, bound),
            bias: vec![0.0; out_features],
            in_features,
            out_features,
        }
    }

    pub fn forward_row(&self, output: &mut [f32], input: &[f32]) {
        matmul(output, input, &self.weight, self.in_features, self.out_features);
        output.iter_mut().zip(self.bias.iter()).for_each(|(out, &b)| *out += b);
    }

    pub fn forward(&self, x: &Tensor3) -> Tensor3 {
        debug_assert_eq!(x.dim, self.in_features);
        x.map_rows(self.out_features, |out, inp| self.forward_row(out, inp))
    }
}

impl Parameterized for Linear {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        vec![("weight".to_string(), self.weight.as_slice()), ("bias".to_string(), self.bias.as_slice())]
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        vec![("weight".to_string(), self.weight.as_mut_slice()), ("bias".to_string(), self.bias.as_mut_slice())]
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .finish()
    }
}

/// Dropout regularization
///
/// Zeroes each value with probability `rate` and rescales survivors by
/// `1 / (1 - rate)` while training; the identity otherwise.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    pub fn new(rate: f32) -> Self {
        assert!((0.0..1.0).contains(&rate), "Dropout rate must be in [0, 1)");
        Self { rate }
    }

    pub fn apply(&self, x: &mut [f32], mode: &mut ForwardMode<'_>) {
        let ForwardMode::Train(rng) = mode else {
            return;
        };
        if self.rate == 0.0 {
            return;
        }

        let scale = (1.0 - self.rate).recip();
        for val in x.iter_mut() {
            if rng.random::<f32>() < self.rate {
                *val = 0.0;
            } else {
                *val *= scale;
            }
        }
    }
}

/// Multi-Head Self-Attention under causal and key padding masks
///
/// **Components**:
/// - **Q, K, V Projections**: Linear transformations to query, key, value spaces
/// - **Scaled Dot-Product Attention**: softmax over allowed keys only
/// - **Output Projection**: Final linear transformation
///
/// **Attention Formula**:
/// ```text
/// Attention(Q,K,V) = softmax(QK^T / √d_k + M)V,  M = -inf where forbidden
/// ```
///
/// A query with no allowed key produces a zero context vector.
pub struct MultiHeadAttention {
    pub wq: Linear,
    pub wk: Linear,
    pub wv: Linear,
    pub wo: Linear,
    pub n_heads: usize,
    pub head_dim: usize,
    pub dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new<R: Rng + ?Sized>(dim: usize, n_heads: usize, dropout: f32, rng: &mut R) -> Self {
        assert_eq!(dim % n_heads, 0, "dim must be divisible by n_heads");

        let wq = Linear::xavier(dim, dim, rng);
        let wk = Linear::xavier(dim, dim, rng);
        let wv = Linear::xavier(dim, dim, rng);
        let mut wo = Linear::new(dim, dim, rng);
        wo.bias.fill(0.0);

        Self { wq, wk, wv, wo, n_heads, head_dim: dim / n_heads, dropout: Dropout::new(dropout) }
    }

    pub fn forward(&self, x: &Tensor3, masks: &AttentionMasks, mode: &mut ForwardMode<'_>) -> Tensor3 {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);

        let mut probs = self.attention_weights(&q, &k, masks);
        self.dropout.apply(&mut probs, mode);

        let context = self.weighted_values(&probs, &v);
        self.wo.forward(&context)
    }

    /// Attention probabilities laid out as [batch, n_heads, seq_len (query), seq_len (key)].
    fn attention_weights(&self, q: &Tensor3, k: &Tensor3, masks: &AttentionMasks) -> Vec<f32> {
        let (batch, seq_len, _) = q.shape();
        let attention_scale = (self.head_dim as f32).sqrt().recip();
        let mut probs = vec![0.0; batch * self.n_heads * seq_len * seq_len];

        probs.par_chunks_mut(seq_len).enumerate().for_each(|(chunk_idx, att_row)| {
            let query = chunk_idx % seq_len;
            let head_idx = (chunk_idx / seq_len) % self.n_heads;
            let batch_idx = chunk_idx / (seq_len * self.n_heads);
            let head_range = head_idx * self.head_dim..(head_idx + 1) * self.head_dim;
            let q_head = &q.row(batch_idx, query)[head_range.clone()];

            let mut any_allowed = false;
            att_row.iter_mut().enumerate().for_each(|(key, score)| {
                if masks.allows(batch_idx, query, key) {
                    any_allowed = true;
                    *score = dot(q_head, &k.row(batch_idx, key)[head_range.clone()]) * attention_scale;
                } else {
                    *score = f32::NEG_INFINITY;
                }
            });

            if any_allowed {
                softmax(att_row);
            } else {
                att_row.fill(0.0);
            }
        });

        probs
    }

    /// Mixes value vectors with attention probabilities; output shape [batch, seq_len, dim].
    fn weighted_values(&self, probs: &[f32], v: &Tensor3) -> Tensor3 {
        let (batch, seq_len, dim) = v.shape();
        let mut context = Tensor3::zeros(batch, seq_len, dim);

        context.par_rows_mut().enumerate().for_each(|(row_idx, out)| {
            let batch_idx = row_idx / seq_len;
            let query = row_idx % seq_len;

            for (head_idx, out_head) in out.chunks_exact_mut(self.head_dim).enumerate() {
                let att_offset = ((batch_idx * self.n_heads + head_idx) * seq_len + query) * seq_len;
                let att_row = &probs[att_offset..att_offset + seq_len];
                let head_range = head_idx * self.head_dim..(head_idx + 1) * self.head_dim;

                for (key, &weight) in att_row.iter().enumerate() {
                    if weight == 0.0 {
                        continue;
                    }
                    out_head
                        .iter_mut()
                        .zip(&v.row(batch_idx, key)[head_range.clone()])
                        .for_each(|(o, &value)| *o += weight * value);
                }
            }
        });

        context
    }
}

impl Parameterized for MultiHeadAttention {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        let mut params = with_prefix("wq", self.wq.parameters());
        params.extend(with_prefix("wk", self.wk.parameters()));
        params.extend(with_prefix("wv", self.wv.parameters()));
        params.extend(with_prefix("wo", self.wo.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        let mut params = with_prefix("wq", self.wq.parameters_mut());
        params.extend(with_prefix("wk", self.wk.parameters_mut()));
        params.extend(with_prefix("wv", self.wv.parameters_mut()));
        params.extend(with_prefix("wo", self.wo.parameters_mut()));
        params
    }
}

impl std::fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("n_heads", &self.n_heads)
            .field("head_dim", &self.head_dim)
            .field("wq", &self.wq)
            .field("wk", &self.wk)
            .field("wv", &self.wv)
            .field("wo", &self.wo)
            .field("dropout", &self.dropout.rate)
            .finish()
    }
}

/// Position-wise Feed-Forward Network with ReLU activation
///
/// **Formula**: `FFN(x) = W2 · dropout(ReLU(W1 · x + b1)) + b2`
pub struct FeedForward {
    pub w1: Linear, // Expansion to feedforward_dim
    pub w2: Linear, // Projection back to dim
    pub dropout: Dropout,
}

impl FeedForward {
    pub fn new<R: Rng + ?Sized>(dim: usize, hidden_dim: usize, dropout: f32, rng: &mut R) -> Self {
        Self { w1: Linear::new(dim, hidden_dim, rng), w2: Linear::new(hidden_dim, dim, rng), dropout: Dropout::new(dropout) }
    }

    pub fn forward(&self, x: &Tensor3, mode: &mut ForwardMode<'_>) -> Tensor3 {
        let mut hidden = self.w1.forward(x);
        hidden.data.par_iter_mut().for_each(|val| *val = val.max(0.0));
        self.dropout.apply(&mut hidden.data, mode);
        self.w2.forward(&hidden)
    }
}

impl Parameterized for FeedForward {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        let mut params = with_prefix("w1", self.w1.parameters());
        params.extend(with_prefix("w2", self.w2.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        let mut params = with_prefix("w1", self.w1.parameters_mut());
        params.extend(with_prefix("w2", self.w2.parameters_mut()));
        params
    }
}

impl std::fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedForward")
            .field("hidden_dim", &self.w1.out_features)
            .field("w1", &self.w1)
            .field("w2", &self.w2)
            .finish()
    }
}

// Applies softmax normalization to a slice in-place.
pub fn softmax(x: &mut [f32]) {
    let max_val = x.iter().fold(f32::NEG_INFINITY, |acc, &val| acc.max(val));
    let sum = x
        .iter_mut()
        .map(|val| {
            *val = (*val - max_val).exp();
            *val
        })
        .sum::<f32>();
    let inv_sum = sum.recip();
    x.iter_mut().for_each(|val| *val *= inv_sum);
}

/// Numerically stable `ln(1 + e^x)`.
#[inline]
pub fn softplus(x: f32) -> f32 {
    if x > SOFTPLUS_THRESHOLD { x } else { x.exp().ln_1p() }
}
