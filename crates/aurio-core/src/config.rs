//! Fingerprinting configuration
//!
//! A TOML file selects a base profile and overrides single parameters of it:
//!
//! ```toml
//! base = "wang"
//! peak_fanout = 8
//!
//! [matching]
//! filter = "mid"
//! window = 30.0
//! ```

use crate::fingerprint::{ExponentialDecayThreshold, Profile};
use crate::matching::MatchFilterMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Profile a configuration starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseProfile {
    #[default]
    Default,
    Wang,
}

impl BaseProfile {
    pub fn profile(&self) -> Profile {
        match self {
            BaseProfile::Default => Profile::default_profile(),
            BaseProfile::Wang => Profile::wang(),
        }
    }
}

/// Fingerprint profile selection and overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FingerprintConfig {
    #[serde(default)]
    pub base: BaseProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum_temporal_smoothing_coefficient: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum_smoothing_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peaks_per_frame: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_fanout: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_zone_distance: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_zone_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_zone_width: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_min_frames: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_max_frames: Option<usize>,
    /// Overrides the accept curve; without a reject override the reject curve
    /// follows it at a sixth of its height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_accept: Option<ExponentialDecayThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_reject: Option<ExponentialDecayThreshold>,
    #[serde(default)]
    pub matching: MatchingConfig,
}

/// Match post-processing of the matcher CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    #[serde(default)]
    pub filter: MatchFilterMode,
    /// Filter window in seconds, one match per track pair when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<f64>,
    #[serde(default = "default_remove_duplicates")]
    pub remove_duplicates: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            filter: MatchFilterMode::default(),
            window: None,
            remove_duplicates: default_remove_duplicates(),
        }
    }
}

fn default_remove_duplicates() -> bool {
    true
}

impl FingerprintConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The base profile with all overrides applied
    pub fn to_profile(&self) -> Profile {
        let mut profile = self.base.profile();
        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    profile.$field = value;
                })*
            };
        }
        apply!(
            sample_rate,
            window_size,
            hop_size,
            spectrum_temporal_smoothing_coefficient,
            spectrum_smoothing_length,
            peaks_per_frame,
            peak_fanout,
            target_zone_distance,
            target_zone_length,
            target_zone_width,
            matching_min_frames,
            matching_max_frames
        );
        if let Some(accept) = self.threshold_accept {
            profile.threshold_accept = accept;
            profile.threshold_reject =
                ExponentialDecayThreshold::new(accept.base, accept.width_scale, accept.height / 6.0);
        }
        if let Some(reject) = self.threshold_reject {
            profile.threshold_reject = reject;
        }
        if self.base != BaseProfile::Default || self.has_overrides() {
            profile.name = format!("{} (configured)", profile.name);
        }
        profile
    }

    fn has_overrides(&self) -> bool {
        self.sample_rate.is_some()
            || self.window_size.is_some()
            || self.hop_size.is_some()
            || self.spectrum_temporal_smoothing_coefficient.is_some()
            || self.spectrum_smoothing_length.is_some()
            || self.peaks_per_frame.is_some()
            || self.peak_fanout.is_some()
            || self.target_zone_distance.is_some()
            || self.target_zone_length.is_some()
            || self.target_zone_width.is_some()
            || self.matching_min_frames.is_some()
            || self.matching_max_frames.is_some()
            || self.threshold_accept.is_some()
            || self.threshold_reject.is_some()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        let profile = self.to_profile();
        if profile.sample_rate == 0 {
            anyhow::bail!("sample_rate must be > 0");
        }
        if profile.window_size < 2 || profile.hop_size == 0 {
            anyhow::bail!("window_size must be >= 2 and hop_size > 0");
        }
        if profile.hop_size > profile.window_size {
            anyhow::bail!(
                "hop_size {} must not exceed window_size {}",
                profile.hop_size,
                profile.window_size
            );
        }
        let alpha = profile.spectrum_temporal_smoothing_coefficient;
        if !(alpha > 0.0 && alpha <= 1.0) {
            anyhow::bail!("spectrum_temporal_smoothing_coefficient {} outside (0, 1]", alpha);
        }
        if profile.matching_min_frames >= profile.matching_max_frames {
            anyhow::bail!(
                "matching_min_frames {} must be < matching_max_frames {}",
                profile.matching_min_frames,
                profile.matching_max_frames
            );
        }
        if let Some(window) = self.matching.window {
            if !(window > 0.0 && window.is_finite()) {
                anyhow::bail!("matching window must be a positive number of seconds");
            }
        }
        profile.validate().context("Invalid fingerprint profile")?;

        if !profile.hash_fields_fit_byte() {
            log::warn!(
                "Profile '{}' exceeds the hash field range (bins < 256, distance <= 255), \
                 hashes keep the low byte of each field",
                profile.name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FingerprintConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.to_profile(), Profile::default());
        assert_eq!(config.matching.filter, MatchFilterMode::Best);
        assert!(config.matching.remove_duplicates);
    }

    #[test]
    fn test_overrides_apply_to_base() {
        let config = FingerprintConfig::from_toml_str(
            r#"
            base = "wang"
            peak_fanout = 8
            threshold_accept = { base = 0.5, width_scale = 4.0, height = 0.6 }

            [matching]
            filter = "mid"
            window = 30.0
            "#,
        )
        .unwrap();
        let profile = config.to_profile();
        assert_eq!(profile.sample_rate, 8000);
        assert_eq!(profile.peak_fanout, 8);
        assert_eq!(profile.threshold_accept.width_scale, 4.0);
        assert!((profile.threshold_reject.height - 0.1).abs() < 1e-12);
        assert!(profile.name.starts_with("Wang03 guessed"));
        assert_eq!(config.matching.filter, MatchFilterMode::Mid);
        assert_eq!(config.matching.window, Some(30.0));
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(FingerprintConfig::from_toml_str("hop_size = 1024").is_err());
        assert!(FingerprintConfig::from_toml_str("sample_rate = 0").is_err());
        assert!(FingerprintConfig::from_toml_str("matching_min_frames = 5000").is_err());
        assert!(FingerprintConfig::from_toml_str("spectrum_temporal_smoothing_coefficient = 1.5").is_err());
        assert!(FingerprintConfig::from_toml_str("base = \"panako\"").is_err());
        assert!(FingerprintConfig::from_toml_str("peaks = 3").is_err());
        assert!(FingerprintConfig::from_toml_str("[matching]\nwindow = -1.0").is_err());
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let mut config = FingerprintConfig::default();
        config.base = BaseProfile::Wang;
        config.target_zone_length = Some(100);
        let text = toml::to_string(&config).unwrap();
        let back = FingerprintConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = FingerprintConfig::load("/nonexistent/aurio.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
