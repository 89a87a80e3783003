#[cfg(test)]
#[path = "../tests/unit/heads_test.rs"]
mod heads_test;

use crate::configuration::{ModelConfig, NUM_FEATURES, OutputHeadKind};
use crate::layers::{Linear, softplus};
use crate::params::{Parameterized, with_prefix};
use crate::tensor::{Tensor3, dot};
use anyhow::Result;
use rand::Rng;

/// Initial value of the free scale parameter; the effective scale is its exponential.
const INITIAL_LOGIT_SCALE: f32 = 1.0;

/// Converts contextual embeddings into unnormalized logits over the joint bin space.
///
/// Input: [batch, seq_len, hidden_dim], output: [batch, seq_len, total_bins].
/// The flattened bin axis follows [`crate::BinCodec`] ordering.
pub trait OutputHead: Parameterized {
    fn forward(&self, emb: &Tensor3) -> Tensor3;

    fn total_bins(&self) -> usize;
}

/// Direct projection from the hidden dimension onto every joint bin.
pub struct LinearHead {
    pub proj: Linear,
}

impl LinearHead {
    pub fn new<R: Rng + ?Sized>(hidden_dim: usize, total_bins: usize, rng: &mut R) -> Self {
        Self { proj: Linear::new(hidden_dim, total_bins, rng) }
    }
}

impl OutputHead for LinearHead {
    fn forward(&self, emb: &Tensor3) -> Tensor3 {
        self.proj.forward(emb)
    }

    fn total_bins(&self) -> usize {
        self.proj.out_features
    }
}

impl Parameterized for LinearHead {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        with_prefix("proj", self.proj.parameters())
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        with_prefix("proj", self.proj.parameters_mut())
    }
}

impl std::fmt::Debug for LinearHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearHead").field("proj", &self.proj).finish()
    }
}

/// Factorized head: a low-rank product of per-feature bin embeddings
///
/// **Process Flow:**
/// 1. Project the embedding to `(n0 + n1 + n2) * hidden_dim` values and apply softplus
/// 2. Split into bin embeddings `e0: [n0, H]`, `e1: [n1, H]`, `e2: [n2, H]`
/// 3. Combine: `logit[b0, b1, b2] = exp(s) * Σ_h e0[b0,h] · e1[b1,h] · e2[b2,h]`
///
/// Parameters grow with the sum of bin counts rather than their product.
pub struct ProductHead {
    pub proj: Linear,
    /// Free scale parameter, single element.
    pub logit_scale: Vec<f32>,
    pub num_bins: [usize; NUM_FEATURES],
    pub hidden_dim: usize,
}

impl ProductHead {
    pub fn new<R: Rng + ?Sized>(hidden_dim: usize, num_bins: &[usize], rng: &mut R) -> Result<Self> {
        let num_bins: [usize; NUM_FEATURES] = num_bins.try_into().map_err(|_| {
            anyhow::anyhow!("Product head supports exactly {NUM_FEATURES} features, got {}", num_bins.len())
        })?;
        if num_bins.contains(&0) {
            anyhow::bail!("Product head requires non-zero bin counts, got {num_bins:?}");
        }

        let combined_bins: usize = num_bins.iter().sum();
        Ok(Self {
            proj: Linear::new(hidden_dim, combined_bins * hidden_dim, rng),
            logit_scale: vec![INITIAL_LOGIT_SCALE],
            num_bins,
            hidden_dim,
        })
    }

    /// Fills `logits` (length total_bins) from one embedding row.
    fn forward_row(&self, logits: &mut [f32], emb: &[f32], bin_emb: &mut [f32], pair: &mut [f32]) {
        let hd = self.hidden_dim;
        let [n0, n1, _] = self.num_bins;

        self.proj.forward_row(bin_emb, emb);
        bin_emb.iter_mut().for_each(|val| *val = softplus(*val));

        let (emb0, rest) = bin_emb.split_at(n0 * hd);
        let (emb1, emb2) = rest.split_at(n1 * hd);
        let scale = self.logit_scale[0].exp();

        // Feature 2 is the slowest axis, feature 0 the fastest.
        for (b2, e2) in emb2.chunks_exact(hd).enumerate() {
            for (b1, e1) in emb1.chunks_exact(hd).enumerate() {
                pair.iter_mut().zip(e1.iter().zip(e2)).for_each(|(p, (&y, &z))| *p = y * z);

                let offset = (b2 * n1 + b1) * n0;
                for (b0, e0) in emb0.chunks_exact(hd).enumerate() {
                    logits[offset + b0] = scale * dot(e0, pair);
                }
            }
        }
    }
}

impl OutputHead for ProductHead {
    fn forward(&self, emb: &Tensor3) -> Tensor3 {
        let combined = self.proj.out_features;
        emb.map_rows(self.total_bins(), |logits, row| {
            let mut bin_emb = vec![0.0; combined];
            let mut pair = vec![0.0; self.hidden_dim];
            self.forward_row(logits, row, &mut bin_emb, &mut pair);
        })
    }

    fn total_bins(&self) -> usize {
        self.num_bins.iter().product()
    }
}

impl Parameterized for ProductHead {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        let mut params = with_prefix("proj", self.proj.parameters());
        params.push(("logit_scale".to_string(), self.logit_scale.as_slice()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        let mut params = with_prefix("proj", self.proj.parameters_mut());
        params.push(("logit_scale".to_string(), self.logit_scale.as_mut_slice()));
        params
    }
}

impl std::fmt::Debug for ProductHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductHead")
            .field("num_bins", &self.num_bins)
            .field("hidden_dim", &self.hidden_dim)
            .field("proj", &self.proj)
            .finish()
    }
}

/// Output head selected once at model construction.
#[non_exhaustive]
pub enum OutputHeads {
    Linear(LinearHead),
    Product(ProductHead),
}

impl OutputHeads {
    pub fn from_config<R: Rng + ?Sized>(config: &ModelConfig, rng: &mut R) -> Result<Self> {
        match config.output {
            OutputHeadKind::Linear => Ok(Self::Linear(LinearHead::new(config.hidden_dim, config.total_bins(), rng))),
            OutputHeadKind::Product => Ok(Self::Product(ProductHead::new(config.hidden_dim, &config.num_bins, rng)?)),
        }
    }

    pub fn kind(&self) -> OutputHeadKind {
        match self {
            OutputHeads::Linear(_) => OutputHeadKind::Linear,
            OutputHeads::Product(_) => OutputHeadKind::Product,
        }
    }
}

impl OutputHead for OutputHeads {
    fn forward(&self, emb: &Tensor3) -> Tensor3 {
        match self {
            OutputHeads::Linear(head) => head.forward(emb),
            OutputHeads::Product(head) => head.forward(emb),
        }
    }

    fn total_bins(&self) -> usize {
        match self {
            OutputHeads::Linear(head) => head.total_bins(),
            OutputHeads::Product(head) => head.total_bins(),
        }
    }
}

impl Parameterized for OutputHeads {
    fn parameters(&self) -> Vec<(String, &[f32])> {
        match self {
            OutputHeads::Linear(head) => head.parameters(),
            OutputHeads::Product(head) => head.parameters(),
        }
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])> {
        match self {
            OutputHeads::Linear(head) => head.parameters_mut(),
            OutputHeads::Product(head) => head.parameters_mut(),
        }
    }
}

impl std::fmt::Debug for OutputHeads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputHeads::Linear(head) => head.fmt(f),
            OutputHeads::Product(head) => head.fmt(f),
        }
    }
}
