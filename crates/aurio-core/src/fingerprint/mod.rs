//! Wang-2003 landmark fingerprinting
//!
//! The generator pairs spectral peaks of a frame with peaks in a target zone
//! of later frames and encodes each pair as a 24-bit hash. The store indexes
//! the hashes of many tracks and finds time-aligned runs of shared hashes
//! between pairs of tracks.

mod generator;
mod profile;
mod store;

pub use generator::FingerprintGenerator;
pub use profile::{ExponentialDecayThreshold, Profile};
pub use store::FingerprintStore;

use serde::{Deserialize, Serialize};

/// A hash found at an analysis frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubFingerprint {
    /// Frame index, `hash_time_scale` seconds apart
    pub index: u32,
    /// `bin1 << 16 | bin2 << 8 | distance`
    pub hash: u32,
}

impl SubFingerprint {
    pub fn new(index: u32, hash: u32) -> Self {
        Self { index, hash }
    }
}
