//! Sine wave generator

use super::samples::{put_f32, F32_SIZE};
use super::{check_aligned, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};
use std::f64::consts::PI;

/// Mono float stream of a pure sine tone.
///
/// The phase derives from the absolute sample index, so seeking and chunked
/// reads yield identical samples.
#[derive(Debug, Clone)]
pub struct SineGeneratorStream {
    properties: AudioProperties,
    frequency: f64,
    length: u64,
    position: u64,
}

impl SineGeneratorStream {
    pub fn new(sample_rate: u32, frequency: f64, duration_seconds: f64) -> Result<Self> {
        if !(frequency > 0.0) || !(duration_seconds >= 0.0) {
            return Err(AudioError::InvalidConfiguration(format!(
                "invalid sine parameters: {} Hz for {} s",
                frequency, duration_seconds
            )));
        }
        let properties = AudioProperties::ieee(1, sample_rate)?;
        let length = properties.time_to_bytes(duration_seconds).max(0) as u64;
        Ok(Self {
            properties,
            frequency,
            length,
            position: 0,
        })
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }
}

impl AudioStream for SineGeneratorStream {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond length {}",
                position, self.length
            )));
        }
        check_aligned(position, F32_SIZE, "position")?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, F32_SIZE, "read count")?;
        let count = (buffer.len() as u64).min(self.length - self.position) as usize;
        let first_sample = self.position / F32_SIZE as u64;
        let period = self.properties.sample_rate() as f64 / self.frequency;
        for x in 0..count / F32_SIZE {
            let n = (first_sample + x as u64) as f64;
            put_f32(buffer, x, (n / period * 2.0 * PI).sin() as f32);
        }
        self.position += count as u64;
        Ok(count)
    }
}
