#[cfg(test)]
#[path = "../tests/unit/bins_test.rs"]
mod bins_test;

use crate::configuration::NUM_FEATURES;
use anyhow::Result;

/// Marks a feature bin that is not generated yet or belongs to padding.
pub const SENTINEL: i64 = -1;

/// One jet constituent: a bin index per feature, or [`SENTINEL`] values.
pub type Particle = [i64; NUM_FEATURES];

/// A particle made of sentinels only.
pub const PADDING_PARTICLE: Particle = [SENTINEL; NUM_FEATURES];

/// Maps particles to joint bin indices and back.
///
/// The joint index enumerates the product space with feature 0 varying
/// fastest: `idx = b0 + n0 * (b1 + n1 * b2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinCodec {
    num_bins: [usize; NUM_FEATURES],
}

impl BinCodec {
    pub fn new(num_bins: [usize; NUM_FEATURES]) -> Result<Self> {
        if let Some(idx) = num_bins.iter().position(|&bins| bins == 0) {
            anyhow::bail!("Feature {idx} has zero bins");
        }
        Ok(Self { num_bins })
    }

    pub fn num_bins(&self) -> [usize; NUM_FEATURES] {
        self.num_bins
    }

    pub fn total_bins(&self) -> usize {
        self.num_bins.iter().product()
    }

    /// Encodes a fully specified particle into its joint bin index.
    pub fn encode(&self, particle: &Particle) -> Result<usize> {
        let mut index = 0;
        let mut stride = 1;
        for (feature, (&bin, &bins)) in particle.iter().zip(self.num_bins.iter()).enumerate() {
            if bin < 0 || bin as usize >= bins {
                anyhow::bail!("Feature {feature} bin {bin} is outside [0, {bins})");
            }
            index += bin as usize * stride;
            stride *= bins;
        }
        Ok(index)
    }

    /// Decodes a joint bin index into per-feature bins.
    pub fn decode(&self, index: usize) -> Result<Particle> {
        let total = self.total_bins();
        if index >= total {
            anyhow::bail!("Joint bin index {index} is outside [0, {total})");
        }

        let mut rest = index;
        let mut particle = PADDING_PARTICLE;
        for (bin, &bins) in particle.iter_mut().zip(self.num_bins.iter()) {
            *bin = (rest % bins) as i64;
            rest /= bins;
        }
        Ok(particle)
    }
}
