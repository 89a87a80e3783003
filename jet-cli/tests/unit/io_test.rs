use super::*;
use tempfile::TempDir;

#[test]
fn test_starts_file_parses_particles() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("starts.json");
    std::fs::write(&path, "[[5, 10, 2], [0, 0, 0]]")?;

    let starts: Vec<Particle> = read_json(&path)?;
    assert_eq!(starts, vec![[5, 10, 2], [0, 0, 0]]);
    Ok(())
}

#[test]
fn test_malformed_input_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("jets.json");
    std::fs::write(&path, "[[[1, 2]]]")?;

    assert!(read_json::<Vec<Vec<Particle>>>(&path).is_err());
    assert!(read_json::<Vec<Particle>>(&temp_dir.path().join("missing.json")).is_err());
    Ok(())
}

#[test]
fn test_sample_output_written_to_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("samples.json");
    let output = SampleOutput { jets: vec![vec![[1, 2, 3], [0, 0, 1]]], joint_bins: vec![vec![7, 9]] };

    write_json(&output, Some(&path))?;

    let contents = std::fs::read_to_string(&path)?;
    assert_eq!(contents, r#"{"jets":[[[1,2,3],[0,0,1]]],"joint_bins":[[7,9]]}"#);
    assert_eq!(read_json::<SampleOutput>(&path)?, output);
    Ok(())
}

#[test]
fn test_score_output_round_trips() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("scores.json");
    let output = ScoreOutput::new(vec![-12.5, -3.25]);

    write_json(&output, Some(&path))?;
    assert_eq!(read_json::<ScoreOutput>(&path)?, output);
    Ok(())
}

#[test]
fn test_non_finite_scores_are_written_as_null() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("scores.json");
    let output = ScoreOutput::new(vec![-2.5, f64::NEG_INFINITY, f64::NAN]);

    assert_eq!(output.non_finite(), vec![1, 2]);
    write_json(&output, Some(&path))?;

    assert_eq!(std::fs::read_to_string(&path)?, r#"{"scores":[-2.5,null,null]}"#);
    Ok(())
}
