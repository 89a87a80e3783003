#[cfg(test)]
#[path = "../tests/unit/batch_test.rs"]
mod batch_test;

use crate::bins::{BinCodec, PADDING_PARTICLE, Particle, SENTINEL};
use crate::configuration::NUM_FEATURES;
use anyhow::Result;

/// Target marker for positions that carry no prediction target.
pub const IGNORE_TARGET: i64 = -1;

/// A batch of fixed-length particle sequences with their padding mask.
///
/// `bins` is laid out as [batch, seq_len]; `padding_mask` is `true` where a
/// position holds real data.
#[derive(Clone, PartialEq)]
pub struct JetBatch {
    pub bins: Vec<Particle>,
    pub padding_mask: Vec<bool>,
    pub batch: usize,
    pub seq_len: usize,
}

impl JetBatch {
    pub fn new(bins: Vec<Particle>, padding_mask: Vec<bool>, batch: usize, seq_len: usize) -> Result<Self> {
        if batch == 0 || seq_len == 0 {
            anyhow::bail!("Batch must not be empty: got {batch} x {seq_len}");
        }
        if bins.len() != batch * seq_len {
            anyhow::bail!("Batch has {} particles, expected {batch} x {seq_len}", bins.len());
        }
        if padding_mask.len() != batch * seq_len {
            anyhow::bail!("Padding mask has {} entries, expected {batch} x {seq_len}", padding_mask.len());
        }
        if let Some((idx, particle)) = bins.iter().enumerate().find(|(_, p)| p.iter().any(|&bin| bin < SENTINEL)) {
            anyhow::bail!("Particle {idx} has a negative bin that is not the sentinel: {particle:?}");
        }

        Ok(Self { bins, padding_mask, batch, seq_len })
    }

    /// Pads every sequence with sentinel particles up to `max_len` and derives
    /// the padding mask from the sentinels.
    pub fn from_sequences(sequences: &[Vec<Particle>], max_len: usize) -> Result<Self> {
        let mut bins = Vec::with_capacity(sequences.len() * max_len);
        for (idx, sequence) in sequences.iter().enumerate() {
            if sequence.len() > max_len {
                anyhow::bail!("Sequence {idx} has {} particles, more than max_len {max_len}", sequence.len());
            }
            bins.extend_from_slice(sequence);
            bins.extend(std::iter::repeat_n(PADDING_PARTICLE, max_len - sequence.len()));
        }

        let padding_mask = padding_from_sentinels(&bins);
        Self::new(bins, padding_mask, sequences.len(), max_len)
    }

    pub fn particle(&self, batch: usize, pos: usize) -> &Particle {
        &self.bins[batch * self.seq_len + pos]
    }

    pub fn is_valid(&self, batch: usize, pos: usize) -> bool {
        self.padding_mask[batch * self.seq_len + pos]
    }

    /// Number of real positions per sequence.
    pub fn valid_lengths(&self) -> Vec<usize> {
        self.padding_mask.chunks_exact(self.seq_len).map(|row| row.iter().filter(|&&valid| valid).count()).collect()
    }

    /// Writes `particle` at `pos` and refreshes the padding mask of that position.
    pub fn set_particle(&mut self, batch: usize, pos: usize, particle: Particle) {
        let idx = batch * self.seq_len + pos;
        self.bins[idx] = particle;
        self.padding_mask[idx] = particle[0] != SENTINEL;
    }

    /// Copy of the bins with sentinels replaced by bin 0, ready for embedding lookup.
    pub fn clamped(&self) -> Vec<[usize; NUM_FEATURES]> {
        self.bins.iter().map(|particle| particle.map(|bin| bin.max(0) as usize)).collect()
    }

    /// Checks every bin against the per-feature bin counts.
    pub fn validate_bins(&self, num_bins: &[usize; NUM_FEATURES]) -> Result<()> {
        for (idx, particle) in self.bins.iter().enumerate() {
            for (feature, (&bin, &bins)) in particle.iter().zip(num_bins.iter()).enumerate() {
                if bin >= bins as i64 {
                    anyhow::bail!(
                        "Sequence {} position {} feature {feature}: bin {bin} is outside [0, {bins})",
                        idx / self.seq_len,
                        idx % self.seq_len
                    );
                }
            }
        }
        Ok(())
    }

    /// Joint bin index per position.
    ///
    /// A position is [`IGNORE_TARGET`] when it is padding or when the position
    /// predicting it is padding, so padded rows are never scored.
    pub fn joint_targets(&self, codec: &BinCodec) -> Result<Vec<i64>> {
        self.bins
            .iter()
            .enumerate()
            .map(|(idx, particle)| {
                let pos = idx % self.seq_len;
                let context_valid = pos == 0 || self.padding_mask[idx - 1];
                match self.padding_mask[idx] && context_valid {
                    true => codec.encode(particle).map(|joint| joint as i64),
                    false => Ok(IGNORE_TARGET),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for JetBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetBatch")
            .field("batch", &self.batch)
            .field("seq_len", &self.seq_len)
            .field("valid_positions", &self.padding_mask.iter().filter(|&&valid| valid).count())
            .finish()
    }
}

/// A position is real data once its first feature is no longer the sentinel.
pub fn padding_from_sentinels(bins: &[Particle]) -> Vec<bool> {
    bins.iter().map(|particle| particle[0] != SENTINEL).collect()
}
