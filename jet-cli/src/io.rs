#[cfg(test)]
#[path = "../tests/unit/io_test.rs"]
mod io_test;

use anyhow::{Context, Result};
use jet_transformer::{GeneratedJets, Particle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Body of `jetgen sample` output.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SampleOutput {
    pub jets: Vec<Vec<Particle>>,
    pub joint_bins: Vec<Vec<usize>>,
}

impl From<GeneratedJets> for SampleOutput {
    fn from(generated: GeneratedJets) -> Self {
        Self { jets: generated.jets, joint_bins: generated.joint_bins }
    }
}

/// Body of `jetgen score` output.
///
/// JSON has no representation for infinities or NaN: such scores are written as `null`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoreOutput {
    pub scores: Vec<Option<f64>>,
}

impl ScoreOutput {
    pub fn new(scores: Vec<f64>) -> Self {
        Self { scores: scores.into_iter().map(|score| score.is_finite().then_some(score)).collect() }
    }

    /// Indices of jets whose score could not be represented.
    pub fn non_finite(&self) -> Vec<usize> {
        self.scores.iter().enumerate().filter(|(_, score)| score.is_none()).map(|(idx, _)| idx).collect()
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Writes `value` as JSON to `output`, or to stdout when no path is given.
pub fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}
