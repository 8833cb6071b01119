use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use khepri_contracts::GenerationRequest;
use khepri_engine::{Engine, EngineConfig};

#[derive(Debug, Parser)]
#[command(name = "khepri", version, about = "Submit an image generation job and wait for the result")]
struct Cli {
    /// Text description of the image to generate.
    #[arg(long)]
    prompt: String,
    /// Input image: a public URL or a local file to stage (repeatable, max 8).
    #[arg(long = "image")]
    images: Vec<String>,
    #[arg(long, default_value = "3:4")]
    aspect_ratio: String,
    /// Output resolution: 1K, 2K or 4K.
    #[arg(long, default_value = "2K")]
    resolution: String,
    /// Output format: png or jpg.
    #[arg(long, default_value = "png")]
    output_format: String,
    /// Seconds between status queries.
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Overall wall-clock ceiling in seconds.
    #[arg(long)]
    timeout: Option<u64>,
}

fn main() {
    env_logger::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("khepri error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(seconds) = cli.poll_interval {
        config.poll.interval = Duration::from_secs(seconds.max(1));
    }
    if let Some(seconds) = cli.timeout {
        config.poll.ceiling = Duration::from_secs(seconds.max(1));
    }

    let request = GenerationRequest::from_inputs(
        &cli.prompt,
        &cli.images,
        Some(&cli.aspect_ratio),
        Some(&cli.resolution),
        Some(&cli.output_format),
    )?;

    let engine = Engine::from_config(&config);
    let outcome = engine.generate(&request);

    let rendered =
        serde_json::to_string_pretty(&outcome).context("failed to render outcome as JSON")?;
    println!("{rendered}");
    Ok(if outcome.is_success() { 0 } else { 1 })
}
