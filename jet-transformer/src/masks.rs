#[cfg(test)]
#[path = "../tests/unit/masks_test.rs"]
mod masks_test;

use anyhow::Result;

/// Attention restrictions for one forward pass.
///
/// Both masks use `true` for "forbidden": the causal mask forbids attending
/// to later positions and the key padding mask forbids attending to padding.
#[derive(Clone, PartialEq)]
pub struct AttentionMasks {
    /// Shape: [seq_len, seq_len], `causal[i * seq_len + j]` is true iff j > i
    pub causal: Vec<bool>,
    /// Shape: [batch, seq_len], true where the key is padding
    pub key_padding: Vec<bool>,
    pub batch: usize,
    pub seq_len: usize,
}

impl AttentionMasks {
    /// Builds masks from a padding mask that is `true` where data is real.
    pub fn new(padding_mask: &[bool], batch: usize, seq_len: usize) -> Result<Self> {
        if padding_mask.len() != batch * seq_len {
            anyhow::bail!(
                "Padding mask has {} entries, expected {batch} x {seq_len}",
                padding_mask.len()
            );
        }

        Ok(Self {
            causal: causal_mask(seq_len),
            key_padding: padding_mask.iter().map(|&valid| !valid).collect(),
            batch,
            seq_len,
        })
    }

    /// Whether query `query` of sequence `batch` may attend to key `key`.
    #[inline]
    pub fn allows(&self, batch: usize, query: usize, key: usize) -> bool {
        !self.causal[query * self.seq_len + key] && !self.key_padding[batch * self.seq_len + key]
    }

    /// Whether `pos` of sequence `batch` holds padding.
    #[inline]
    pub fn is_padding(&self, batch: usize, pos: usize) -> bool {
        self.key_padding[batch * self.seq_len + pos]
    }
}

impl std::fmt::Debug for AttentionMasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttentionMasks")
            .field("batch", &self.batch)
            .field("seq_len", &self.seq_len)
            .field("padded_positions", &self.key_padding.iter().filter(|&&pad| pad).count())
            .finish()
    }
}

/// Causal mask of shape [seq_len, seq_len]: position i may not see j > i.
///
/// ```text
/// [0 1 1 1]  position 0 can only see itself
/// [0 0 1 1]  position 1 can see 0,1
/// [0 0 0 1]  position 2 can see 0,1,2
/// [0 0 0 0]  position 3 can see all
/// ```
pub fn causal_mask(seq_len: usize) -> Vec<bool> {
    (0..seq_len).flat_map(|i| (0..seq_len).map(move |j| j > i)).collect()
}
