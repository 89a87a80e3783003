mod io;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use io::{SampleOutput, ScoreOutput, read_json, write_json};
use jet_checkpoint::{load_checkpoint, load_model_config, save_checkpoint};
use jet_transformer::{
    ExecutionContext, JetBatch, JetTransformerBuilder, ModelConfig, Particle, ProbabilityOptions, Sampler,
};
use log::{error, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn threads_arg() -> Arg {
    Arg::new("threads")
        .short('t')
        .long("threads")
        .value_name("INT")
        .help("Worker threads for the forward pass, (default) = all cores")
        .value_parser(clap::value_parser!(usize))
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Output JSON file, (default) = stdout")
        .value_parser(clap::value_parser!(PathBuf))
}

fn seed_arg() -> Arg {
    Arg::new("seed")
        .short('s')
        .long("seed")
        .value_name("INT")
        .help("Random seed")
        .default_value("0")
        .value_parser(clap::value_parser!(u64))
}

/// Define the init subcommand.
fn init_subcommand() -> Command {
    Command::new("init")
        .about("Create a randomly initialized model checkpoint")
        .arg(
            Arg::new("OUTPUT")
                .help("Output path for the binary checkpoint")
                .required(true)
                .index(1)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Model configuration JSON, (default) = built-in defaults")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(seed_arg())
}

/// Define the sample subcommand.
fn sample_subcommand() -> Command {
    Command::new("sample")
        .about("Generate jets autoregressively from starting particles")
        .arg(
            Arg::new("checkpoint")
                .help("Model checkpoint file")
                .required(true)
                .index(1)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("starts")
                .long("starts")
                .value_name("FILE")
                .help("JSON list of starting particles [[pt, eta, phi], ...]")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(seed_arg())
        .arg(
            Arg::new("batch-size")
                .short('b')
                .long("batch-size")
                .value_name("INT")
                .help("Sequences generated together per forward pass")
                .default_value("1")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(threads_arg())
        .arg(output_arg())
}

/// Define the score subcommand.
fn score_subcommand() -> Command {
    Command::new("score")
        .about("Compute per-jet likelihoods under a model")
        .arg(
            Arg::new("checkpoint")
                .help("Model checkpoint file")
                .required(true)
                .index(1)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("jets")
                .long("jets")
                .value_name("FILE")
                .help("JSON list of jets, each a list of [pt, eta, phi] particles")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("perplexity")
                .long("perplexity")
                .help("Normalize each step probability by the jet length")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("logarithmic")
                .long("logarithmic")
                .help("Report log-likelihoods instead of probabilities (an underflowing step yields -inf, written as null)")
                .action(ArgAction::SetTrue),
        )
        .arg(threads_arg())
        .arg(output_arg())
}

fn required_path<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a Path> {
    matches.get_one::<PathBuf>(name).map(PathBuf::as_path).with_context(|| format!("Missing argument: {name}"))
}

fn execution_context(matches: &ArgMatches) -> Result<ExecutionContext> {
    match matches.get_one::<usize>("threads") {
        Some(&threads) => ExecutionContext::with_threads(threads),
        None => Ok(ExecutionContext::global()),
    }
}

/// Run the init command with the provided arguments
fn run_init_command(matches: &ArgMatches) -> Result<()> {
    let output = required_path(matches, "OUTPUT")?;
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or_default();

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            info!("📁 Config: {}", path.display());
            load_model_config(path)?
        }
        None => ModelConfig::default(),
    };

    info!("🚀 Initializing {:?} head model with seed {seed}", config.output);
    let model = JetTransformerBuilder::new(config).with_seed(seed).build()?;
    save_checkpoint(&model, output)
}

/// Run the sample command with the provided arguments
fn run_sample_command(matches: &ArgMatches) -> Result<()> {
    let model = load_checkpoint(required_path(matches, "checkpoint")?)?;
    let starts: Vec<Particle> = read_json(required_path(matches, "starts")?)?;
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or_default();
    let batch_size = matches.get_one::<usize>("batch-size").copied().unwrap_or(1);
    if batch_size == 0 {
        anyhow::bail!("Batch size must be positive");
    }
    let ctx = execution_context(matches)?;

    let sampler = Sampler::new(model.config().max_len).with_batch_size(batch_size);
    info!("🎲 Sampling {} jets of {} particles (seed {seed})", starts.len(), sampler.max_len());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let generated = sampler.sample(&model, &ctx, &starts, &mut rng)?;

    write_json(&SampleOutput::from(generated), matches.get_one::<PathBuf>("output").map(PathBuf::as_path))
}

/// Run the score command with the provided arguments
fn run_score_command(matches: &ArgMatches) -> Result<()> {
    let model = load_checkpoint(required_path(matches, "checkpoint")?)?;
    let jets: Vec<Vec<Particle>> = read_json(required_path(matches, "jets")?)?;
    if jets.is_empty() {
        anyhow::bail!("No jets to score");
    }
    let options = ProbabilityOptions {
        perplexity: matches.get_flag("perplexity"),
        logarithmic: matches.get_flag("logarithmic"),
    };
    let ctx = execution_context(matches)?;

    let max_len = jets.iter().map(Vec::len).max().unwrap_or_default().max(1);
    let batch = JetBatch::from_sequences(&jets, max_len)?;

    info!("📊 Scoring {} jets ({options:?})", jets.len());
    let output = ScoreOutput::new(model.score(&ctx, &batch, options)?);

    let non_finite = output.non_finite();
    if !non_finite.is_empty() {
        warn!("⚠️ {} scores are not finite and are written as null, jets: {non_finite:?}", non_finite.len());
    }

    write_json(&output, matches.get_one::<PathBuf>("output").map(PathBuf::as_path))
}

fn execute_commands() -> Result<()> {
    // Initialize logger with clean format (no timestamp/module prefix)
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "{}", record.args())
        })
        .init();

    let matches = Command::new("jetgen")
        .about("Jet transformer CLI: initialize, sample and score jet constituent models")
        .subcommand(init_subcommand())
        .subcommand(sample_subcommand())
        .subcommand(score_subcommand())
        .get_matches();

    match matches.subcommand() {
        Some(("init", matches)) => run_init_command(matches),
        Some(("sample", matches)) => run_sample_command(matches),
        Some(("score", matches)) => run_score_command(matches),
        _ => anyhow::bail!("No subcommand specified. Use -h to print help information."),
    }
}

fn main() {
    if let Err(e) = execute_commands() {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}
