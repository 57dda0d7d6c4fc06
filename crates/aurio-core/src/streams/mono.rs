//! Channel downmix

use super::samples::{f32_at, put_f32, F32_SIZE};
use super::{check_aligned, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};

/// Averages all source channels into one signal and replicates it to
/// `output_channels` channels.
pub struct MonoStream<S> {
    source: S,
    properties: AudioProperties,
    downmix: bool,
    source_buffer: Vec<u8>,
}

impl<S: AudioStream> MonoStream<S> {
    pub fn new(source: S, output_channels: usize) -> Result<Self> {
        let source_properties = source.properties();
        source_properties.require_ieee_f32("MonoStream")?;
        let properties = AudioProperties::ieee(output_channels, source_properties.sample_rate())?;
        Ok(Self {
            source,
            properties,
            downmix: true,
            source_buffer: Vec::new(),
        })
    }

    pub fn downmix(&self) -> bool {
        self.downmix
    }

    /// Disabling the downmix is only possible when channel counts already match
    pub fn set_downmix(&mut self, downmix: bool) -> Result<()> {
        if !downmix && self.source_channels() != self.properties.channels() {
            return Err(AudioError::InvalidConfiguration(format!(
                "downmix required for {} to {} channels",
                self.source_channels(),
                self.properties.channels()
            )));
        }
        self.downmix = downmix;
        Ok(())
    }

    fn source_channels(&self) -> usize {
        self.source.properties().channels()
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: AudioStream> AudioStream for MonoStream<S> {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        self.source.length() / self.source_channels() as u64 * self.properties.channels() as u64
    }

    fn position(&self) -> u64 {
        self.source.position() / self.source_channels() as u64 * self.properties.channels() as u64
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        check_aligned(position, self.sample_block_size(), "position")?;
        let source_position =
            position / self.properties.channels() as u64 * self.source_channels() as u64;
        self.source.set_position(source_position)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if !self.downmix {
            return self.source.read(buffer);
        }

        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let source_channels = self.source_channels();
        let output_channels = self.properties.channels();
        let blocks = buffer.len() / (F32_SIZE * output_channels);
        let source_block = F32_SIZE * source_channels;
        let source_count = blocks * source_block;
        if self.source_buffer.len() < source_count {
            self.source_buffer.resize(source_count, 0);
        }

        let n = self.source.read(&mut self.source_buffer[..source_count])?;
        let read_blocks = n / source_block;
        for block in 0..read_blocks {
            let mut sum = 0.0f32;
            for channel in 0..source_channels {
                sum += f32_at(&self.source_buffer, block * source_channels + channel)
                    / source_channels as f32;
            }
            for channel in 0..output_channels {
                put_f32(buffer, block * output_channels + channel, sum);
            }
        }
        Ok(read_blocks * F32_SIZE * output_channels)
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::samples::f32_at;
    use crate::streams::{read_to_end, MemorySourceStream};
    use approx::assert_relative_eq;

    #[test]
    fn test_downmix_to_mono() {
        let source = MemorySourceStream::from_f32(&[1.0, 0.0, 0.5, 0.5, -1.0, 0.0], 2, 100).unwrap();
        let mut mono = MonoStream::new(source, 1).unwrap();
        assert_eq!(mono.length(), 12);

        let data = read_to_end(&mut mono, 64).unwrap();
        assert_eq!(data.len(), 12);
        assert_relative_eq!(f32_at(&data, 0), 0.5);
        assert_relative_eq!(f32_at(&data, 1), 0.5);
        assert_relative_eq!(f32_at(&data, 2), -0.5);
        assert_eq!(mono.position(), 12);
    }

    #[test]
    fn test_upmix_replicates_average() {
        let source = MemorySourceStream::from_f32(&[0.2, 0.4], 1, 100).unwrap();
        let mut stereo = MonoStream::new(source, 2).unwrap();
        assert_eq!(stereo.length(), 16);

        let data = read_to_end(&mut stereo, 64).unwrap();
        assert_relative_eq!(f32_at(&data, 0), 0.2);
        assert_relative_eq!(f32_at(&data, 1), 0.2);
        assert_relative_eq!(f32_at(&data, 2), 0.4);
        assert_relative_eq!(f32_at(&data, 3), 0.4);
    }

    #[test]
    fn test_downmix_toggle() {
        let source = MemorySourceStream::from_f32(&[0.0; 4], 2, 100).unwrap();
        let mut mono = MonoStream::new(source, 1).unwrap();
        assert!(mono.set_downmix(false).is_err());

        let source = MemorySourceStream::from_f32(&[0.1, 0.9], 2, 100).unwrap();
        let mut stereo = MonoStream::new(source, 2).unwrap();
        stereo.set_downmix(false).unwrap();
        let data = read_to_end(&mut stereo, 64).unwrap();
        assert_relative_eq!(f32_at(&data, 0), 0.1);
        assert_relative_eq!(f32_at(&data, 1), 0.9);
    }

    #[test]
    fn test_requires_float_input() {
        let props = AudioProperties::new(1, 100, 16, crate::streams::SampleFormat::Lpcm).unwrap();
        let source = MemorySourceStream::new(vec![0u8; 4], props).unwrap();
        assert!(MonoStream::new(source, 1).is_err());
    }
}
