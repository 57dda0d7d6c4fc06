//! Parameter sets for the Wang-2003 fingerprinter

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};

/// Time-decaying threshold `base^(x / width_scale) * height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDecayThreshold {
    pub base: f64,
    pub width_scale: f64,
    pub height: f64,
}

impl ExponentialDecayThreshold {
    pub fn new(base: f64, width_scale: f64, height: f64) -> Self {
        Self {
            base,
            width_scale,
            height,
        }
    }

    /// Threshold after `x` seconds of compared frames
    pub fn calculate(&self, x: f64) -> f64 {
        self.base.powf(x / self.width_scale) * self.height
    }
}

/// Fingerprinting and matching parameters.
///
/// Profiles are plain values: the generator and the store read them but never
/// branch on which profile is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Analysis sample rate in Hz
    pub sample_rate: u32,
    /// STFT window size in samples
    pub window_size: usize,
    /// STFT hop size in samples
    pub hop_size: usize,
    /// Alpha of the per-bin running average
    pub spectrum_temporal_smoothing_coefficient: f32,
    /// Moving average length over bins, 0 disables smoothing
    pub spectrum_smoothing_length: usize,
    pub peaks_per_frame: usize,
    /// Pairs kept per frame
    pub peak_fanout: usize,
    /// Frames between a peak and the start of its target zone
    pub target_zone_distance: usize,
    /// Target zone length in frames
    pub target_zone_length: usize,
    /// Target zone width in bins
    pub target_zone_width: usize,
    pub matching_min_frames: usize,
    pub matching_max_frames: usize,
    pub threshold_accept: ExponentialDecayThreshold,
    pub threshold_reject: ExponentialDecayThreshold,
}

impl Profile {
    /// General purpose profile at 11025 Hz
    pub fn default_profile() -> Self {
        let sample_rate = 11025;
        let hop_size = 256;
        let frames_per_second = sample_rate as f64 / hop_size as f64;
        let threshold_accept = ExponentialDecayThreshold::new(0.5, 2.0, 0.3);
        let threshold_reject = ExponentialDecayThreshold::new(
            threshold_accept.base,
            threshold_accept.width_scale,
            threshold_accept.height / 6.0,
        );
        Self {
            name: "Wang03 guessed default".to_string(),
            sample_rate,
            window_size: 512,
            hop_size,
            spectrum_temporal_smoothing_coefficient: 0.05,
            spectrum_smoothing_length: 0,
            peaks_per_frame: 3,
            peak_fanout: 5,
            target_zone_distance: 2,
            target_zone_length: 30,
            target_zone_width: 63,
            matching_min_frames: 10,
            matching_max_frames: (frames_per_second * 30.0) as usize,
            threshold_accept,
            threshold_reject,
        }
    }

    /// Parameters guessed from the Wang (2003) paper.
    ///
    /// The target zone spans more than 255 frames and bins, so hashes keep only
    /// the low byte of each field. Matching limits are those of the default
    /// profile.
    pub fn wang() -> Self {
        let sample_rate = 8000;
        let window_size = 1024;
        let hop_size = 64;
        let frames_per_second = sample_rate as f64 / hop_size as f64;
        let bin_bandwidth = sample_rate as f64 / window_size as f64;
        Self {
            name: "Wang03 guessed".to_string(),
            sample_rate,
            window_size,
            hop_size,
            peak_fanout: 10,
            target_zone_distance: (2.0 * frames_per_second) as usize,
            target_zone_length: (5.0 * frames_per_second) as usize,
            target_zone_width: (1400.0 / bin_bandwidth) as usize,
            ..Self::default_profile()
        }
    }

    /// Seconds between two frame indices
    pub fn hash_time_scale(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }

    pub fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }

    /// Accept threshold per compared frame count
    pub fn threshold_accept_curve(&self) -> Vec<f64> {
        self.curve(&self.threshold_accept)
    }

    /// Reject threshold per compared frame count
    pub fn threshold_reject_curve(&self) -> Vec<f64> {
        self.curve(&self.threshold_reject)
    }

    fn curve(&self, threshold: &ExponentialDecayThreshold) -> Vec<f64> {
        let scale = self.hash_time_scale();
        (0..self.matching_max_frames)
            .map(|i| threshold.calculate(i as f64 * scale))
            .collect()
    }

    /// Rejects parameters the generator or the store cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AudioError::InvalidConfiguration(msg));
        if self.sample_rate == 0 || self.window_size < 2 || self.hop_size == 0 {
            return invalid(format!(
                "profile '{}' needs a sample rate, a window of at least 2 and a hop",
                self.name
            ));
        }
        if self.hop_size > self.window_size {
            return invalid(format!(
                "profile '{}' hop {} exceeds window {}",
                self.name, self.hop_size, self.window_size
            ));
        }
        let alpha = self.spectrum_temporal_smoothing_coefficient;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return invalid(format!(
                "profile '{}' smoothing coefficient {} outside (0, 1]",
                self.name, alpha
            ));
        }
        if self.peaks_per_frame == 0 || self.peak_fanout == 0 || self.target_zone_length == 0 {
            return invalid(format!(
                "profile '{}' needs peaks, fan-out and a target zone",
                self.name
            ));
        }
        if self.matching_min_frames >= self.matching_max_frames {
            return invalid(format!(
                "profile '{}' min frames {} not below max frames {}",
                self.name, self.matching_min_frames, self.matching_max_frames
            ));
        }
        for threshold in [&self.threshold_accept, &self.threshold_reject] {
            let ExponentialDecayThreshold {
                base,
                width_scale,
                height,
            } = *threshold;
            if !(base > 0.0 && base.is_finite() && width_scale > 0.0 && height.is_finite()) {
                return invalid(format!(
                    "profile '{}' threshold {:?} is not a decay curve",
                    self.name, threshold
                ));
            }
        }
        Ok(())
    }

    /// Whether every hash field fits its byte without truncation
    pub fn hash_fields_fit_byte(&self) -> bool {
        self.window_size / 2 <= 256
            && self.target_zone_distance + self.target_zone_length <= 255
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::default_profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_threshold_shape() {
        let threshold = ExponentialDecayThreshold::new(0.5, 2.0, 0.3);
        assert_relative_eq!(threshold.calculate(0.0), 0.3);
        assert_relative_eq!(threshold.calculate(2.0), 0.15);

        let mut last = f64::MAX;
        for i in 0..200 {
            let value = threshold.calculate(i as f64 * 0.1);
            assert!(value <= last);
            last = value;
        }
    }

    #[test]
    fn test_default_profile() {
        let profile = Profile::default();
        assert_eq!(profile.sample_rate, 11025);
        assert_eq!(profile.matching_max_frames, 1291);
        assert_relative_eq!(profile.hash_time_scale(), 256.0 / 11025.0);
        assert_relative_eq!(profile.threshold_reject.height, 0.05);
        assert!(profile.hash_fields_fit_byte());
        profile.validate().unwrap();

        let accept = profile.threshold_accept_curve();
        let reject = profile.threshold_reject_curve();
        assert_eq!(accept.len(), 1291);
        assert_relative_eq!(accept[0], 0.3);
        assert!(reject.iter().zip(&accept).all(|(r, a)| r < a));
    }

    #[test]
    fn test_wang_profile() {
        let profile = Profile::wang();
        assert_eq!(profile.name, "Wang03 guessed");
        assert_eq!(profile.target_zone_distance, 250);
        assert_eq!(profile.target_zone_length, 625);
        assert_eq!(profile.target_zone_width, 179);
        assert_eq!(profile.peak_fanout, 10);
        assert_eq!(profile.matching_max_frames, 1291);
        assert_relative_eq!(profile.hash_time_scale(), 0.008);
        assert!(!profile.hash_fields_fit_byte());
        profile.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_broken_profiles() {
        let mut profile = Profile::default();
        profile.hop_size = 1024;
        assert!(profile.validate().is_err());

        let mut profile = Profile::default();
        profile.spectrum_temporal_smoothing_coefficient = 0.0;
        assert!(profile.validate().is_err());

        let mut profile = Profile::default();
        profile.matching_min_frames = profile.matching_max_frames;
        assert!(profile.validate().is_err());

        let mut profile = Profile::default();
        profile.threshold_accept.width_scale = 0.0;
        assert!(profile.validate().is_err());
    }
}
