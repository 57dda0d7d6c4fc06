//! fpmatcher - Fingerprint matcher
//!
//! Usage:
//!   fpmatcher <wav> <wav>...                        # best match per connected file pair
//!   fpmatcher --filter mid --window 30 <wav>...     # one match per 30s window
//!   fpmatcher --config <path> <wav>...              # settings from TOML

use anyhow::{Context, Result};
use aurio_cli::output::print_json_matches;
use aurio_core::matching::{
    determine_match_groups, filter_coincident_matches, filter_duplicate_matches,
};
use aurio_core::streams::WavFileStream;
use aurio_core::{
    FingerprintConfig, FingerprintGenerator, FingerprintStore, Match, MatchFilterMode,
    SubFingerprint, TrackId,
};
use clap::Parser;
use rayon::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "fpmatcher")]
#[command(about = "Find time-aligned matches between WAV files", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Match filter mode: best, first, mid or last (overrides config)
    #[arg(short, long)]
    filter: Option<MatchFilterMode>,

    /// Filter window in seconds, one match per window (overrides config)
    #[arg(short, long)]
    window: Option<f64>,

    /// Input WAV files
    #[arg(required = true, num_args = 2..)]
    inputs: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    let mut config = match &args.config {
        Some(path) => FingerprintConfig::load(path)?,
        None => FingerprintConfig::default(),
    };
    if let Some(mode) = args.filter {
        config.matching.filter = mode;
    }
    if args.window.is_some() {
        config.matching.window = args.window;
    }
    config.validate()?;

    let profile = config.to_profile();
    log::info!("Using profile '{}'", profile.name);
    let generator = FingerprintGenerator::new(profile.clone())?;
    let store = FingerprintStore::new(profile)?;

    // Fingerprint all files in parallel
    let start = std::time::Instant::now();
    let fingerprints: Vec<Vec<SubFingerprint>> = args
        .inputs
        .par_iter()
        .map(|input| {
            let stream = WavFileStream::open(input)
                .with_context(|| format!("Failed to open {}", input))?;
            generator
                .generate_all(stream)
                .with_context(|| format!("Failed to fingerprint {}", input))
        })
        .collect::<Result<_>>()?;
    log::info!(
        "Fingerprinted {} files in {:.2}s",
        fingerprints.len(),
        start.elapsed().as_secs_f64()
    );

    // Ingest in input order so track ids are file indices
    let tracks: Vec<TrackId> = (0..fingerprints.len() as u32).map(TrackId).collect();
    for (track, sub_fingerprints) in tracks.iter().zip(&fingerprints) {
        store.add(*track, sub_fingerprints);
    }

    let start = std::time::Instant::now();
    let mut matches = store.find_all_matches_with_progress(|progress| {
        log::info!("Matching {:.0}%", progress);
    });
    log::info!(
        "Found {} matches in {:.2}s",
        matches.len(),
        start.elapsed().as_secs_f64()
    );
    if config.matching.remove_duplicates {
        matches = filter_duplicate_matches(&matches);
    }

    let mut groups = determine_match_groups(
        &tracks,
        &matches,
        Some(config.matching.filter),
        config.matching.window,
    )?;
    let mut filtered: Vec<Match> = Vec::new();
    for group in groups.iter_mut() {
        filter_coincident_matches(&mut group.pairs);
        filtered.extend(group.pairs.iter().flat_map(|pair| pair.matches.iter().cloned()));
    }
    log::info!("{} groups, {} matches", groups.len(), filtered.len());

    print_json_matches(&args.inputs, &filtered);
    Ok(())
}
