//! Aurio Core - Audio Stream Processing and Synchronization Library
//!
//! Composable audio streams (crop, format conversion, mixing, buffering,
//! resampling, time warping) and a Wang-2003 landmark fingerprinter whose
//! matches align recordings of the same event.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matching;
pub mod resampler;
pub mod streams;
pub mod timewarp;
pub mod transform;

pub use config::FingerprintConfig;
pub use error::{AudioError, Result};
pub use fingerprint::{FingerprintGenerator, FingerprintStore, Profile, SubFingerprint};
pub use matching::{Match, MatchFilterMode, TrackId};
pub use resampler::ResamplingQuality;
pub use streams::{AudioProperties, AudioStream};
pub use timewarp::{TimeWarp, TimeWarpCollection};

/// Generate sub-fingerprints from a WAV file
pub fn generate_fingerprints<P: AsRef<std::path::Path>>(
    audio_path: P,
    profile: &Profile,
) -> Result<Vec<SubFingerprint>> {
    let stream = streams::WavFileStream::open(audio_path)?;
    FingerprintGenerator::new(profile.clone())?.generate_all(stream)
}
