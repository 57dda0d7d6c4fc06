//! In-memory source streams

use super::{check_aligned, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};

/// A seekable stream over a byte buffer held in memory
#[derive(Debug, Clone)]
pub struct MemorySourceStream {
    data: Vec<u8>,
    properties: AudioProperties,
    position: u64,
}

impl MemorySourceStream {
    pub fn new(data: Vec<u8>, properties: AudioProperties) -> Result<Self> {
        check_aligned(
            data.len() as u64,
            properties.sample_block_byte_size(),
            "data length",
        )?;
        Ok(Self {
            data,
            properties,
            position: 0,
        })
    }

    /// Builds a float stream from interleaved samples
    pub fn from_f32(samples: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        let properties = AudioProperties::ieee(channels, sample_rate)?;
        let mut data = vec![0u8; samples.len() * 4];
        super::samples::encode_f32(samples, &mut data);
        Self::new(data, properties)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl AudioStream for MemorySourceStream {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.length() {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond length {}",
                position,
                self.length()
            )));
        }
        check_aligned(position, self.sample_block_size(), "position")?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let start = self.position as usize;
        let count = buffer.len().min(self.data.len() - start);
        buffer[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }
}

/// A silent stream of fixed length
#[derive(Debug, Clone)]
pub struct NullStream {
    properties: AudioProperties,
    length: u64,
    position: u64,
}

impl NullStream {
    pub fn new(properties: AudioProperties, length: u64) -> Result<Self> {
        check_aligned(length, properties.sample_block_byte_size(), "length")?;
        Ok(Self {
            properties,
            length,
            position: 0,
        })
    }
}

impl AudioStream for NullStream {
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
        check_aligned(position, self.sample_block_size(), "position")?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let count = (buffer.len() as u64).min(self.length - self.position) as usize;
        buffer[..count].fill(0);
        self.position += count as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_rejects_unaligned_seek() {
        let mut stream = MemorySourceStream::from_f32(&[0.0; 8], 2, 100).unwrap();
        assert_eq!(stream.length(), 32);
        assert!(stream.set_position(4).is_err());
        assert!(stream.set_position(40).is_err());
        stream.set_position(24).unwrap();

        let mut buffer = [1u8; 16];
        assert_eq!(stream.read(&mut buffer).unwrap(), 8);
        assert_eq!(stream.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_null_stream_is_silent() {
        let props = AudioProperties::ieee(1, 100).unwrap();
        let mut stream = NullStream::new(props, 12).unwrap();
        let mut buffer = [7u8; 16];
        assert_eq!(stream.read(&mut buffer).unwrap(), 12);
        assert!(buffer[..12].iter().all(|&b| b == 0));
        assert_eq!(stream.position(), 12);
    }
}
