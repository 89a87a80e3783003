#[cfg(test)]
#[path = "../tests/unit/scoring_test.rs"]
mod scoring_test;

use crate::batch::{IGNORE_TARGET, JetBatch};
use crate::context::{ExecutionContext, ForwardMode};
use crate::layers::softmax;
use crate::tensor::Tensor3;
use crate::transformer::JetTransformer;
use anyhow::Result;
use rayon::prelude::*;

/// How per-step probabilities are aggregated into a sequence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbabilityOptions {
    /// Raise each step probability to `1 / valid_length` before aggregating.
    pub perplexity: bool,
    /// Sum log-probabilities instead of multiplying probabilities.
    pub logarithmic: bool,
}

/// Mean next-particle cross-entropy over all non-ignored targets.
///
/// Logits at position `i` are scored against the target at `i + 1`; the last
/// position has no target. Returns 0.0 when no target remains, e.g. for
/// sequences of length 1.
pub fn cross_entropy_loss(logits: &Tensor3, targets: &[i64]) -> Result<f32> {
    let per_token = cross_entropy_per_token(logits, targets)?;
    let shifted = shifted_targets(targets, logits.batch, logits.seq_len);

    let count = shifted.iter().filter(|&&target| target != IGNORE_TARGET).count();
    if count == 0 {
        return Ok(0.0);
    }

    Ok(per_token.iter().sum::<f32>() / count as f32)
}

/// Unreduced cross-entropy, one value per (sequence, step) in [batch, seq_len - 1] order.
///
/// Ignored targets contribute 0.0.
pub fn cross_entropy_per_token(logits: &Tensor3, targets: &[i64]) -> Result<Vec<f32>> {
    validate_targets(logits, targets)?;
    let steps = logits.seq_len - 1;
    let shifted = shifted_targets(targets, logits.batch, logits.seq_len);

    Ok((0..logits.batch * steps)
        .into_par_iter()
        .map(|step_idx| {
            let target = shifted[step_idx];
            if target == IGNORE_TARGET {
                return 0.0;
            }
            let row = logits.row(step_idx / steps, step_idx % steps);
            log_sum_exp(row) - row[target as usize]
        })
        .collect())
}

/// Per-sequence likelihood of the observed particles.
///
/// Steps whose context or target position is padding count as probability
/// 1.0, so padded rows never change the score. Without steps the result is the
/// identity of the aggregation: 1.0 for products, 0.0 for log-sums.
pub fn sequence_probability(
    logits: &Tensor3,
    padding_mask: &[bool],
    targets: &[i64],
    options: ProbabilityOptions,
) -> Result<Vec<f64>> {
    validate_targets(logits, targets)?;
    if padding_mask.len() != logits.batch * logits.seq_len {
        anyhow::bail!(
            "Padding mask has {} entries, expected {} x {}",
            padding_mask.len(),
            logits.batch,
            logits.seq_len
        );
    }

    let seq_len = logits.seq_len;
    Ok((0..logits.batch)
        .into_par_iter()
        .map(|batch_idx| {
            let mask = &padding_mask[batch_idx * seq_len..(batch_idx + 1) * seq_len];
            let valid_len = mask.iter().filter(|&&valid| valid).count().max(1) as f64;

            let step_probs = (0..seq_len - 1).map(|pos| {
                let target = targets[batch_idx * seq_len + pos + 1];
                if !mask[pos] || !mask[pos + 1] || target == IGNORE_TARGET {
                    return 1.0;
                }
                let mut probs = logits.row(batch_idx, pos).to_vec();
                softmax(&mut probs);
                let prob = probs[target as usize] as f64;
                if options.perplexity { prob.powf(valid_len.recip()) } else { prob }
            });

            if options.logarithmic { step_probs.map(f64::ln).sum::<f64>() } else { step_probs.product::<f64>() }
        })
        .collect())
}

impl JetTransformer {
    /// Mean training loss of `batch` given its logits.
    pub fn loss(&self, logits: &Tensor3, batch: &JetBatch) -> Result<f32> {
        cross_entropy_loss(logits, &batch.joint_targets(self.codec())?)
    }

    /// Unreduced loss of `batch` given its logits.
    pub fn loss_per_token(&self, logits: &Tensor3, batch: &JetBatch) -> Result<Vec<f32>> {
        cross_entropy_per_token(logits, &batch.joint_targets(self.codec())?)
    }

    /// Sequence likelihood of `batch` given its logits.
    pub fn probability(&self, logits: &Tensor3, batch: &JetBatch, options: ProbabilityOptions) -> Result<Vec<f64>> {
        sequence_probability(logits, &batch.padding_mask, &batch.joint_targets(self.codec())?, options)
    }

    /// Forward pass followed by [`JetTransformer::probability`].
    pub fn score(&self, ctx: &ExecutionContext, batch: &JetBatch, options: ProbabilityOptions) -> Result<Vec<f64>> {
        let logits = self.forward(ctx, batch, &mut ForwardMode::Eval)?;
        ctx.install(|| self.probability(&logits, batch, options))
    }
}

/// Targets shifted left by one position: entry `(b, i)` is the target of step `i`.
fn shifted_targets(targets: &[i64], batch: usize, seq_len: usize) -> Vec<i64> {
    (0..batch).flat_map(|b| targets[b * seq_len + 1..(b + 1) * seq_len].iter().copied()).collect()
}

fn validate_targets(logits: &Tensor3, targets: &[i64]) -> Result<()> {
    if logits.seq_len == 0 {
        anyhow::bail!("Logits must cover at least one position");
    }
    if targets.len() != logits.batch * logits.seq_len {
        anyhow::bail!("Got {} targets, expected {} x {}", targets.len(), logits.batch, logits.seq_len);
    }
    if let Some(&bad) = targets.iter().find(|&&t| t != IGNORE_TARGET && (t < 0 || t as usize >= logits.dim)) {
        anyhow::bail!("Target {bad} is outside [0, {})", logits.dim);
    }
    Ok(())
}

fn log_sum_exp(row: &[f32]) -> f32 {
    let max_val = row.iter().fold(f32::NEG_INFINITY, |acc, &val| acc.max(val));
    max_val + row.iter().map(|&val| (val - max_val).exp()).sum::<f32>().ln()
}
