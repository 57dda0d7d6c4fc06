//! fpgen - Fingerprint generator
//!
//! Usage: fpgen [--config <path>] <wav>...

use anyhow::{Context, Result};
use aurio_cli::output::{print_json_summaries, FingerprintSummary};
use aurio_core::streams::WavFileStream;
use aurio_core::{FingerprintConfig, FingerprintGenerator};
use clap::Parser;
use rayon::prelude::*;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "fpgen")]
#[command(about = "Generate Wang-2003 sub-fingerprints from WAV files", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Input WAV files
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs (clean JSON output for parsing)
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    let config = match &args.config {
        Some(path) => FingerprintConfig::load(path)?,
        None => FingerprintConfig::default(),
    };
    let profile = config.to_profile();
    log::info!("Using profile '{}'", profile.name);
    let generator = FingerprintGenerator::new(profile)?;

    let start = std::time::Instant::now();
    let summaries = args
        .inputs
        .par_iter()
        .map(|input| fingerprint_file(&generator, Path::new(input)))
        .collect::<Result<Vec<_>>>()?;

    log::info!(
        "Fingerprinted {} files in {:.2}s",
        summaries.len(),
        start.elapsed().as_secs_f64()
    );
    print_json_summaries(&summaries);
    Ok(())
}

fn fingerprint_file(generator: &FingerprintGenerator, path: &Path) -> Result<FingerprintSummary> {
    let stream = WavFileStream::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let duration_seconds = stream.duration();

    let mut sub_fingerprints = 0;
    let frames = generator
        .generate(stream, |batch| sub_fingerprints += batch.len())
        .with_context(|| format!("Failed to fingerprint {}", path.display()))?;

    log::info!(
        "{}: {} sub-fingerprints over {} frames ({:.1}s)",
        path.display(),
        sub_fingerprints,
        frames,
        duration_seconds
    );
    Ok(FingerprintSummary {
        path: path.display().to_string(),
        sub_fingerprints,
        frames,
        duration_seconds,
    })
}
