//! WAV file source

use super::{check_aligned, AudioProperties, AudioStream, SampleFormat};
use crate::error::{AudioError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Uncompressed WAV file decoded with `hound`.
///
/// Integer files are exposed as 16/24-bit LPCM, float files as 32-bit IEEE.
pub struct WavFileStream {
    path: PathBuf,
    reader: hound::WavReader<BufReader<File>>,
    properties: AudioProperties,
    length: u64,
    position: u64,
}

impl WavFileStream {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let format = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) | (hound::SampleFormat::Int, 24) => SampleFormat::Lpcm,
            (hound::SampleFormat::Float, 32) => SampleFormat::Ieee,
            (format, bits) => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{}: {:?} samples with {} bits",
                    path.display(),
                    format,
                    bits
                )))
            }
        };
        let properties = AudioProperties::new(
            spec.channels as usize,
            spec.sample_rate,
            spec.bits_per_sample,
            format,
        )?;
        let length = reader.duration() as u64 * properties.sample_block_byte_size() as u64;
        log::debug!("Opened {} ({}, {} bytes)", path.display(), properties, length);

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            properties,
            length,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.properties.bytes_to_time(self.length as i64)
    }
}

impl AudioStream for WavFileStream {
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
        let block = self.sample_block_size();
        check_aligned(position, block, "position")?;
        let frame = (position / block as u64) as u32;
        self.reader.seek(frame).map_err(|e| {
            AudioError::NotSeekable(format!("{} to frame {}: {}", self.path.display(), frame, e))
        })?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let block = self.sample_block_size();
        check_aligned(buffer.len() as u64, block, "read count")?;
        let remaining = (self.length - self.position) as usize;
        let count = buffer.len().min(remaining);
        let sample_size = self.properties.sample_byte_size();
        let sample_count = count / sample_size;

        let mut written = 0;
        match self.properties.format() {
            SampleFormat::Ieee => {
                for sample in self.reader.samples::<f32>().take(sample_count) {
                    buffer[written..written + 4].copy_from_slice(&sample?.to_le_bytes());
                    written += 4;
                }
            }
            SampleFormat::Lpcm => {
                for sample in self.reader.samples::<i32>().take(sample_count) {
                    let bytes = sample?.to_le_bytes();
                    buffer[written..written + sample_size].copy_from_slice(&bytes[..sample_size]);
                    written += sample_size;
                }
            }
        }

        let read = written / block * block;
        if read < count {
            return Err(AudioError::Decoder(format!(
                "{}: expected {} bytes at position {}, decoded {}",
                self.path.display(),
                count,
                self.position,
                written
            )));
        }
        self.position += read as u64;
        Ok(read)
    }
}
