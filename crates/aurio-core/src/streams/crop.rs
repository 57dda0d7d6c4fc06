//! Sub-range view of a stream

use super::{check_aligned, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};

/// Exposes the byte range `[begin, end)` of the source as `[0, end - begin)`.
pub struct CropStream<S> {
    source: S,
    begin: u64,
    end: u64,
}

impl<S: AudioStream> CropStream<S> {
    pub fn new(source: S, begin: u64, end: u64) -> Result<Self> {
        let mut stream = Self {
            source,
            begin: 0,
            end: 0,
        };
        stream.set_range(begin, end)?;
        stream.source.set_position(begin)?;
        Ok(stream)
    }

    /// Crop covering the whole source
    pub fn full(source: S) -> Result<Self> {
        let end = source.length();
        Self::new(source, 0, end)
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn set_begin(&mut self, begin: u64) -> Result<()> {
        self.validate(begin, self.end)?;
        self.begin = begin;
        if self.source.position() < begin {
            self.source.set_position(begin)?;
        }
        Ok(())
    }

    pub fn set_end(&mut self, end: u64) -> Result<()> {
        self.validate(self.begin, end)?;
        self.end = end;
        if self.source.position() > end {
            self.source.set_position(end)?;
        }
        Ok(())
    }

    /// Sets both bounds at once, so a range may move past the current one
    pub fn set_range(&mut self, begin: u64, end: u64) -> Result<()> {
        self.validate(begin, end)?;
        self.begin = begin;
        self.end = end;
        let position = self.source.position();
        if position < begin {
            self.source.set_position(begin)?;
        } else if position > end {
            self.source.set_position(end)?;
        }
        Ok(())
    }

    fn validate(&self, begin: u64, end: u64) -> Result<()> {
        let length = self.source.length();
        if begin > length || end > length || begin > end {
            return Err(AudioError::InvalidRange(format!(
                "crop range [{}, {}) outside source of length {}",
                begin, end, length
            )));
        }
        let block = self.source.sample_block_size();
        check_aligned(begin, block, "crop begin")?;
        check_aligned(end, block, "crop end")
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: AudioStream> AudioStream for CropStream<S> {
    fn properties(&self) -> AudioProperties {
        self.source.properties()
    }

    fn length(&self) -> u64 {
        self.end - self.begin
    }

    fn position(&self) -> u64 {
        self.source
            .position()
            .clamp(self.begin, self.end)
            .saturating_sub(self.begin)
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.length() {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond crop length {}",
                position,
                self.length()
            )));
        }
        self.source.set_position(self.begin + position)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let remaining = self.length() - self.position();
        let count = (buffer.len() as u64).min(remaining) as usize;
        if count == 0 {
            return Ok(0);
        }
        self.source.read(&mut buffer[..count])
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}
