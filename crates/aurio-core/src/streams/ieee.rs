//! PCM to 32-bit float conversion

use super::samples::{put_f32, F32_SIZE};
use super::{check_aligned, AudioProperties, AudioStream, SampleFormat};
use crate::error::{AudioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Passthrough,
    Pcm16,
    Pcm24,
}

/// Converts 16/24-bit LPCM input to 32-bit IEEE float, passes float input through.
pub struct IeeeStream<S> {
    source: S,
    properties: AudioProperties,
    conversion: Conversion,
    source_buffer: Vec<u8>,
}

impl<S: AudioStream> IeeeStream<S> {
    pub fn new(source: S) -> Result<Self> {
        let source_properties = source.properties();
        let conversion = match (source_properties.format(), source_properties.bit_depth()) {
            (SampleFormat::Ieee, 32) => Conversion::Passthrough,
            (SampleFormat::Lpcm, 16) => Conversion::Pcm16,
            (SampleFormat::Lpcm, 24) => Conversion::Pcm24,
            _ => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "cannot convert {} to IEEE float",
                    source_properties
                )))
            }
        };
        let properties =
            AudioProperties::ieee(source_properties.channels(), source_properties.sample_rate())?;
        Ok(Self {
            source,
            properties,
            conversion,
            source_buffer: Vec::new(),
        })
    }

    fn source_sample_size(&self) -> u64 {
        self.source.properties().sample_byte_size() as u64
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: AudioStream> AudioStream for IeeeStream<S> {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        self.source.length() / self.source_sample_size() * F32_SIZE as u64
    }

    fn position(&self) -> u64 {
        self.source.position() / self.source_sample_size() * F32_SIZE as u64
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        check_aligned(position, self.sample_block_size(), "position")?;
        let source_position = position / F32_SIZE as u64 * self.source_sample_size();
        self.source.set_position(source_position)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if self.conversion == Conversion::Passthrough {
            return self.source.read(buffer);
        }

        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let samples = buffer.len() / F32_SIZE;
        let sample_size = self.source_sample_size() as usize;
        let source_count = samples * sample_size;
        if self.source_buffer.len() < source_count {
            self.source_buffer.resize(source_count, 0);
        }

        let n = self.source.read(&mut self.source_buffer[..source_count])?;
        let converted = n / sample_size;
        let input = &self.source_buffer[..converted * sample_size];
        match self.conversion {
            Conversion::Pcm16 => {
                for (i, b) in input.chunks_exact(2).enumerate() {
                    let value = i16::from_le_bytes([b[0], b[1]]);
                    put_f32(buffer, i, value as f32 / 32767.0);
                }
            }
            Conversion::Pcm24 => {
                for (i, b) in input.chunks_exact(3).enumerate() {
                    let value = (b[0] as i32) << 8 | (b[1] as i32) << 16 | (b[2] as i32) << 24;
                    put_f32(buffer, i, value as f32 / 2_147_483_648.0);
                }
            }
            Conversion::Passthrough => {}
        }
        Ok(converted * F32_SIZE)
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::samples::f32_at;
    use crate::streams::MemorySourceStream;
    use approx::assert_relative_eq;

    #[test]
    fn test_pcm16_conversion() {
        let props = AudioProperties::new(2, 8000, 16, SampleFormat::Lpcm).unwrap();
        let mut data = Vec::new();
        for v in [32767i16, -32767, 0, 16384] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut stream = IeeeStream::new(MemorySourceStream::new(data, props).unwrap()).unwrap();
        assert_eq!(stream.length(), 16);
        assert!(stream.properties().is_ieee_f32());

        let mut buffer = [0u8; 16];
        assert_eq!(stream.read(&mut buffer).unwrap(), 16);
        assert_relative_eq!(f32_at(&buffer, 0), 1.0);
        assert_relative_eq!(f32_at(&buffer, 1), -1.0);
        assert_relative_eq!(f32_at(&buffer, 2), 0.0);
        assert_relative_eq!(f32_at(&buffer, 3), 16384.0 / 32767.0);
        assert_eq!(stream.position(), 16);
    }

    #[test]
    fn test_pcm24_conversion_sign_extends() {
        let props = AudioProperties::new(1, 8000, 24, SampleFormat::Lpcm).unwrap();
        // -1 and the largest positive 24-bit value
        let data = vec![0xff, 0xff, 0xff, 0xff, 0xff, 0x7f];
        let mut stream = IeeeStream::new(MemorySourceStream::new(data, props).unwrap()).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(stream.read(&mut buffer).unwrap(), 8);
        assert_relative_eq!(f32_at(&buffer, 0), -256.0 / 2_147_483_648.0);
        assert_relative_eq!(f32_at(&buffer, 1), 0.99999994, epsilon = 1e-6);
    }

    #[test]
    fn test_positions_scale_with_sample_size() {
        let props = AudioProperties::new(1, 8000, 16, SampleFormat::Lpcm).unwrap();
        let source = MemorySourceStream::new(vec![0u8; 20], props).unwrap();
        let mut stream = IeeeStream::new(source).unwrap();
        assert_eq!(stream.length(), 40);
        stream.set_position(12).unwrap();
        assert_eq!(stream.get_ref().position(), 6);
        assert!(stream.set_position(13).is_err());
    }

    #[test]
    fn test_unsupported_format() {
        let props = AudioProperties::new(1, 8000, 8, SampleFormat::Lpcm).unwrap();
        let source = MemorySourceStream::new(vec![0u8; 4], props).unwrap();
        assert!(matches!(
            IeeeStream::new(source).err(),
            Some(AudioError::UnsupportedFormat(_))
        ));
    }
}
