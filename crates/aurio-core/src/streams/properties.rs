//! Audio stream format descriptor

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encoding of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed integer PCM
    Lpcm,
    /// IEEE 754 floating point
    Ieee,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::Lpcm => write!(f, "LPCM"),
            SampleFormat::Ieee => write!(f, "IEEE"),
        }
    }
}

/// Channel count, sample rate, bit depth and sample format of a stream.
///
/// Validated at construction. Only the stream that owns a descriptor changes it,
/// and only its sample rate (see `ResamplingStream`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProperties {
    channels: usize,
    sample_rate: u32,
    bit_depth: u16,
    format: SampleFormat,
}

impl AudioProperties {
    pub fn new(
        channels: usize,
        sample_rate: u32,
        bit_depth: u16,
        format: SampleFormat,
    ) -> Result<Self> {
        if channels < 1 {
            return Err(AudioError::UnsupportedFormat(
                "channels must be >= 1".to_string(),
            ));
        }
        if sample_rate < 1 {
            return Err(AudioError::UnsupportedFormat(
                "sample rate must be >= 1".to_string(),
            ));
        }
        if bit_depth < 8 || bit_depth % 8 != 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "bit depth must be a positive multiple of 8, got {}",
                bit_depth
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
            bit_depth,
            format,
        })
    }

    /// 32-bit float properties, the working format of most transforms
    pub fn ieee(channels: usize, sample_rate: u32) -> Result<Self> {
        Self::new(channels, sample_rate, 32, SampleFormat::Ieee)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Bytes per single sample
    pub fn sample_byte_size(&self) -> usize {
        self.bit_depth as usize / 8
    }

    /// Bytes per sample block (one sample for every channel)
    pub fn sample_block_byte_size(&self) -> usize {
        self.sample_byte_size() * self.channels
    }

    /// True for the 32-bit IEEE float format
    pub fn is_ieee_f32(&self) -> bool {
        self.format == SampleFormat::Ieee && self.bit_depth == 32
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    /// Converts seconds into a block-aligned byte position.
    ///
    /// Partial sample blocks are dropped; times converted from byte positions
    /// map back to the same position despite floating point error.
    pub fn time_to_bytes(&self, seconds: f64) -> i64 {
        let frames = (seconds * self.sample_rate as f64 + 1e-6).floor() as i64;
        frames * self.sample_block_byte_size() as i64
    }

    /// Converts a byte position into seconds
    pub fn bytes_to_time(&self, bytes: i64) -> f64 {
        bytes as f64 / self.sample_block_byte_size() as f64 / self.sample_rate as f64
    }

    /// Fails with `UnsupportedFormat` unless the properties describe 32-bit float audio
    pub fn require_ieee_f32(&self, context: &str) -> Result<()> {
        if self.is_ieee_f32() {
            Ok(())
        } else {
            Err(AudioError::UnsupportedFormat(format!(
                "{} expects 32-bit IEEE float input, got {}",
                context, self
            )))
        }
    }
}

impl fmt::Display for AudioProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}bit {}Hz {}ch {}",
            self.bit_depth, self.sample_rate, self.channels, self.format
        )
    }
}
