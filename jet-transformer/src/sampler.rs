#[cfg(test)]
#[path = "../tests/unit/sampler_test.rs"]
mod sampler_test;

use crate::batch::{JetBatch, padding_from_sentinels};
use crate::bins::{PADDING_PARTICLE, Particle, SENTINEL};
use crate::context::{ExecutionContext, ForwardMode};
use crate::layers::softmax;
use crate::transformer::JetTransformer;
use anyhow::Result;
use log::{debug, info};
use rand::Rng;

/// Sequences produced by [`Sampler::sample`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedJets {
    /// One sequence of `max_len` particles per starting particle.
    pub jets: Vec<Vec<Particle>>,
    /// Joint bin index of every generated particle, the start included.
    pub joint_bins: Vec<Vec<usize>>,
}

/// Autoregressive generator of full particle sequences.
///
/// Every sequence starts from a given particle and grows one particle per
/// step until it holds `max_len` particles. Each step reruns the model on the
/// sequence so far and draws the next joint bin by inverse-CDF sampling from
/// the distribution predicted at the previous position.
#[derive(Debug, Clone)]
pub struct Sampler {
    max_len: usize,
    batch_size: usize,
}

impl Sampler {
    pub fn new(max_len: usize) -> Self {
        assert!(max_len > 0, "max_len must be positive");
        Self { max_len, batch_size: 1 }
    }

    /// Number of sequences generated together in one forward pass per step.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        self.batch_size = batch_size;
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Generates one sequence per starting particle.
    ///
    /// Uniform draws are consumed per step, in starting-particle order within
    /// a chunk, so a fixed seed reproduces the output exactly.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        model: &JetTransformer,
        ctx: &ExecutionContext,
        starts: &[Particle],
        rng: &mut R,
    ) -> Result<GeneratedJets> {
        let codec = model.codec();
        let start_bins = starts
            .iter()
            .enumerate()
            .map(|(idx, start)| {
                if start.contains(&SENTINEL) {
                    anyhow::bail!("Starting particle {idx} contains the sentinel: {start:?}");
                }
                codec.encode(start)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut generated = GeneratedJets { jets: Vec::with_capacity(starts.len()), joint_bins: Vec::new() };

        for (chunk_idx, (chunk, chunk_bins)) in
            starts.chunks(self.batch_size).zip(start_bins.chunks(self.batch_size)).enumerate()
        {
            debug!("Sampling chunk {chunk_idx} with {} sequences", chunk.len());
            let (jets, joint_bins) = self.sample_chunk(model, ctx, chunk, chunk_bins, rng)?;
            generated.jets.extend(jets);
            generated.joint_bins.extend(joint_bins);
        }

        info!("Sampled {} sequences of {} particles", generated.jets.len(), self.max_len);
        Ok(generated)
    }

    fn sample_chunk<R: Rng + ?Sized>(
        &self,
        model: &JetTransformer,
        ctx: &ExecutionContext,
        starts: &[Particle],
        start_bins: &[usize],
        rng: &mut R,
    ) -> Result<(Vec<Vec<Particle>>, Vec<Vec<usize>>)> {
        let codec = model.codec();
        let n = starts.len();

        let mut bins = vec![PADDING_PARTICLE; n * self.max_len];
        for (idx, start) in starts.iter().enumerate() {
            bins[idx * self.max_len] = *start;
        }
        let padding_mask = padding_from_sentinels(&bins);
        let mut current = JetBatch::new(bins, padding_mask, n, self.max_len)?;

        let mut joint_bins: Vec<Vec<usize>> = start_bins.iter().map(|&bin| vec![bin]).collect();

        for pos in 1..self.max_len {
            let logits = model.forward(ctx, &current, &mut ForwardMode::Eval)?;

            for (seq_idx, seq_bins) in joint_bins.iter_mut().enumerate() {
                let mut probs = logits.row(seq_idx, pos - 1).to_vec();
                softmax(&mut probs);

                let coin = rng.random::<f32>();
                let bin = sample_inverse_cdf(&probs, coin);

                current.set_particle(seq_idx, pos, codec.decode(bin)?);
                seq_bins.push(bin);
            }
        }

        let jets = current.bins.chunks_exact(self.max_len).map(|row| row.to_vec()).collect();
        Ok((jets, joint_bins))
    }
}

/// Smallest index whose cumulative probability reaches `coin`.
///
/// Falls back to the last index when rounding keeps the total below `coin`.
pub fn sample_inverse_cdf(probs: &[f32], coin: f32) -> usize {
    let mut cdf = 0.0;
    for (i, &prob) in probs.iter().enumerate() {
        cdf += prob;
        if coin <= cdf {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}
