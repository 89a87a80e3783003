#[cfg(test)]
#[path = "../tests/unit/configuration_test.rs"]
mod configuration_test;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Number of discretized features per particle (pT, eta, phi).
pub const NUM_FEATURES: usize = 3;

const DEFAULT_HIDDEN_DIM: usize = 256;
const DEFAULT_NUM_LAYERS: usize = 10;
const DEFAULT_NUM_HEADS: usize = 4;
const DEFAULT_NUM_BINS: usize = 41;
const DEFAULT_DROPOUT: f32 = 0.1;
const DEFAULT_MAX_LEN: usize = 20;
const DEFAULT_LAYER_NORM_EPS: f32 = 1e-5;

/// Strategy used to turn contextual embeddings into joint-bin logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputHeadKind {
    /// Single linear projection onto the full joint bin space.
    #[default]
    Linear,
    /// Low-rank product of per-feature bin embeddings.
    Product,
}

impl std::str::FromStr for OutputHeadKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "product" => Ok(Self::Product),
            other => anyhow::bail!("Unknown output head: {other} (expected linear|product)"),
        }
    }
}

/// Hyper-parameters of a jet transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub num_bins: Vec<usize>,
    pub dropout: f32,
    pub output: OutputHeadKind,
    pub max_len: usize,
    /// Inner width of the position-wise feed-forward network, `hidden_dim` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedforward_dim: Option<usize>,
    pub layer_norm_eps: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: DEFAULT_HIDDEN_DIM,
            num_layers: DEFAULT_NUM_LAYERS,
            num_heads: DEFAULT_NUM_HEADS,
            num_bins: vec![DEFAULT_NUM_BINS; NUM_FEATURES],
            dropout: DEFAULT_DROPOUT,
            output: OutputHeadKind::Linear,
            max_len: DEFAULT_MAX_LEN,
            feedforward_dim: None,
            layer_norm_eps: DEFAULT_LAYER_NORM_EPS,
        }
    }
}

impl ModelConfig {
    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder::default()
    }

    /// Bin counts as a fixed-size array. Only valid after [`ModelConfig::validate`].
    pub fn bins(&self) -> Result<[usize; NUM_FEATURES]> {
        self.num_bins.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!("Expected {NUM_FEATURES} bin counts, got {}", self.num_bins.len())
        })
    }

    /// Size of the joint outcome space, the product of all bin counts.
    pub fn total_bins(&self) -> usize {
        self.num_bins.iter().product()
    }

    pub fn feedforward_dim(&self) -> usize {
        self.feedforward_dim.unwrap_or(self.hidden_dim)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_dim / self.num_heads
    }

    /// Checks that the configuration describes a model that can be built.
    pub fn validate(&self) -> Result<()> {
        if self.num_bins.len() != NUM_FEATURES {
            anyhow::bail!(
                "Invalid num_bins: expected exactly {NUM_FEATURES} features, got {}",
                self.num_bins.len()
            );
        }

        if let Some(idx) = self.num_bins.iter().position(|&bins| bins == 0) {
            anyhow::bail!("Invalid num_bins: feature {idx} has zero bins");
        }

        let dimensions = [
            ("hidden_dim", self.hidden_dim),
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("max_len", self.max_len),
            ("feedforward_dim", self.feedforward_dim()),
        ];

        for (name, value) in dimensions {
            if value == 0 {
                anyhow::bail!("Invalid {}: must be positive, got {}", name, value);
            }
        }

        if self.hidden_dim % self.num_heads != 0 {
            anyhow::bail!(
                "hidden_dim ({}) must be divisible by num_heads ({})",
                self.hidden_dim,
                self.num_heads
            );
        }

        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("Invalid dropout: must be in [0, 1), got {}", self.dropout);
        }

        if !(self.layer_norm_eps > 0.0) {
            anyhow::bail!("Invalid layer_norm_eps: must be positive, got {}", self.layer_norm_eps);
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ModelConfigBuilder {
    hidden_dim: Option<usize>,
    num_layers: Option<usize>,
    num_heads: Option<usize>,
    num_bins: Option<Vec<usize>>,
    dropout: Option<f32>,
    output: Option<OutputHeadKind>,
    max_len: Option<usize>,
    feedforward_dim: Option<usize>,
    layer_norm_eps: Option<f32>,
}

impl ModelConfigBuilder {
    pub fn hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = Some(hidden_dim);
        self
    }
    pub fn num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = Some(num_layers);
        self
    }
    pub fn num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = Some(num_heads);
        self
    }
    pub fn num_bins(mut self, num_bins: &[usize]) -> Self {
        self.num_bins = Some(num_bins.to_vec());
        self
    }
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = Some(dropout);
        self
    }
    pub fn output(mut self, output: OutputHeadKind) -> Self {
        self.output = Some(output);
        self
    }
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }
    pub fn feedforward_dim(mut self, feedforward_dim: usize) -> Self {
        self.feedforward_dim = Some(feedforward_dim);
        self
    }
    pub fn layer_norm_eps(mut self, eps: f32) -> Self {
        self.layer_norm_eps = Some(eps);
        self
    }

    /// Applies defaults for unset fields and validates the result.
    pub fn build(self) -> Result<ModelConfig> {
        let defaults = ModelConfig::default();

        let config = ModelConfig {
            hidden_dim: self.hidden_dim.unwrap_or(defaults.hidden_dim),
            num_layers: self.num_layers.unwrap_or(defaults.num_layers),
            num_heads: self.num_heads.unwrap_or(defaults.num_heads),
            num_bins: self.num_bins.unwrap_or(defaults.num_bins),
            dropout: self.dropout.unwrap_or(defaults.dropout),
            output: self.output.unwrap_or(defaults.output),
            max_len: self.max_len.unwrap_or(defaults.max_len),
            feedforward_dim: self.feedforward_dim,
            layer_norm_eps: self.layer_norm_eps.unwrap_or(defaults.layer_norm_eps),
        };

        config.validate()?;
        Ok(config)
    }
}
