//! Sample rate conversion stream

use super::samples::{decode_f32, encode_f32, F32_SIZE};
use super::{align_down, check_aligned, AudioProperties, AudioStream, INFINITE_LENGTH};
use crate::error::{AudioError, Result};
use crate::resampler::{Resampler, ResamplerFactory, ResamplingQuality, RubatoResamplerFactory};
use std::sync::Arc;

/// Bytes read from the source per refill
const SOURCE_BUFFER_BYTES: usize = 32 * 1024;

/// Converts the sample rate of a float stream through a [`Resampler`].
///
/// The stream owns the position and length bookkeeping: its length is the
/// source length times the ratio, and drift of the converter at the end of the
/// stream is trimmed or padded with silence so the final position always
/// equals the length.
pub struct ResamplingStream<S> {
    source: S,
    properties: AudioProperties,
    quality: ResamplingQuality,
    factory: Arc<dyn ResamplerFactory>,
    resampler: Box<dyn Resampler>,
    ratio: f64,
    position: u64,
    /// Decoded source samples not consumed by the converter yet
    input: Vec<f32>,
    input_offset: usize,
    source_bytes: Vec<u8>,
    source_exhausted: bool,
    output: Vec<f32>,
}

impl<S: AudioStream> ResamplingStream<S> {
    /// Resamples to `target_sample_rate`
    pub fn new(source: S, quality: ResamplingQuality, target_sample_rate: u32) -> Result<Self> {
        let ratio = target_sample_rate as f64 / source.properties().sample_rate() as f64;
        let mut stream = Self::with_ratio(source, quality, ratio)?;
        stream.properties.set_sample_rate(target_sample_rate);
        Ok(stream)
    }

    /// Resamples by `ratio` (target rate / source rate)
    pub fn with_ratio(source: S, quality: ResamplingQuality, ratio: f64) -> Result<Self> {
        Self::with_factory(source, quality, ratio, Arc::new(RubatoResamplerFactory))
    }

    pub fn with_factory(
        source: S,
        quality: ResamplingQuality,
        ratio: f64,
        factory: Arc<dyn ResamplerFactory>,
    ) -> Result<Self> {
        let source_properties = source.properties();
        source_properties.require_ieee_f32("ResamplingStream")?;
        if !factory.check_ratio(ratio) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported resampling ratio {}",
                ratio
            )));
        }
        let resampler = factory.create(quality, source_properties.channels(), ratio)?;
        let mut properties = source_properties;
        properties.set_sample_rate(scaled_rate(source_properties.sample_rate(), ratio));
        let block = source_properties.sample_block_byte_size();

        Ok(Self {
            position: source.position(),
            source,
            properties,
            quality,
            factory,
            resampler,
            ratio,
            input: Vec::new(),
            input_offset: 0,
            source_bytes: vec![0u8; (SOURCE_BUFFER_BYTES / block).max(1) * block],
            source_exhausted: false,
            output: Vec::new(),
        })
    }

    pub fn quality(&self) -> ResamplingQuality {
        self.quality
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.properties.sample_rate()
    }

    pub fn set_target_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        let ratio = sample_rate as f64 / self.source.properties().sample_rate() as f64;
        self.apply_ratio(ratio)?;
        self.properties.set_sample_rate(sample_rate);
        Ok(())
    }

    pub fn sample_rate_ratio(&self) -> f64 {
        self.ratio
    }

    pub fn set_sample_rate_ratio(&mut self, ratio: f64) -> Result<()> {
        self.apply_ratio(ratio)?;
        self.properties
            .set_sample_rate(scaled_rate(self.source.properties().sample_rate(), ratio));
        Ok(())
    }

    /// Source bytes read but not converted yet
    pub fn buffered_bytes(&self) -> usize {
        (self.input.len() - self.input_offset) * F32_SIZE
    }

    fn apply_ratio(&mut self, ratio: f64) -> Result<()> {
        if !self.factory.check_ratio(ratio) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported resampling ratio {}",
                ratio
            )));
        }
        if self.quality == ResamplingQuality::VariableRate {
            self.resampler.set_ratio(ratio)?;
        } else {
            self.resampler =
                self.factory
                    .create(self.quality, self.properties.channels(), ratio)?;
        }
        self.ratio = ratio;
        Ok(())
    }

    /// Replaces the converter with a fresh instance for `ratio`
    pub(crate) fn rebuild(&mut self, ratio: f64) -> Result<()> {
        if !self.factory.check_ratio(ratio) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported resampling ratio {}",
                ratio
            )));
        }
        self.resampler = self
            .factory
            .create(self.quality, self.properties.channels(), ratio)?;
        self.ratio = ratio;
        self.properties
            .set_sample_rate(scaled_rate(self.source.properties().sample_rate(), ratio));
        self.discard_input();
        Ok(())
    }

    fn reset_converter(&mut self) -> Result<()> {
        if self.quality == ResamplingQuality::VariableRate {
            self.resampler.clear()?;
            self.resampler.set_ratio(self.ratio)?;
        } else {
            self.resampler =
                self.factory
                    .create(self.quality, self.properties.channels(), self.ratio)?;
        }
        Ok(())
    }

    fn discard_input(&mut self) {
        self.input.clear();
        self.input_offset = 0;
        self.source_exhausted = false;
    }

    fn fill_input(&mut self) -> Result<()> {
        let n = self.source.read(&mut self.source_bytes)?;
        if n == 0 {
            self.source_exhausted = true;
        }
        decode_f32(&self.source_bytes[..n], &mut self.input);
        self.input_offset = 0;
        Ok(())
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

fn scaled_rate(sample_rate: u32, ratio: f64) -> u32 {
    (sample_rate as f64 * ratio).round().max(1.0) as u32
}

impl<S: AudioStream> AudioStream for ResamplingStream<S> {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        let source_length = self.source.length();
        if source_length == INFINITE_LENGTH {
            return INFINITE_LENGTH;
        }
        if self.ratio == 1.0 {
            return source_length;
        }
        let length = (source_length as f64 * self.ratio).ceil() as u64;
        align_down(length, self.sample_block_size())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        let block = self.sample_block_size();
        check_aligned(position, block, "position")?;
        let source_position = if self.ratio == 1.0 {
            position
        } else {
            align_down((position as f64 / self.ratio).ceil() as u64, block)
                .min(self.source.length())
        };
        self.source.set_position(source_position)?;
        self.position = position;
        self.reset_converter()?;
        self.discard_input();
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let count = buffer.len();
        if count == 0 {
            return Ok(0);
        }

        if self.ratio == 1.0 {
            let n = self.source.read(&mut buffer[..count])?;
            self.position += n as u64;
            return Ok(n);
        }

        let output_samples = count / F32_SIZE;
        if self.output.len() < output_samples {
            self.output.resize(output_samples, 0.0);
        }

        let mut used;
        let mut generated;
        let mut end_of_stream;
        loop {
            if self.input_offset >= self.input.len() && !self.source_exhausted {
                self.fill_input()?;
            }
            end_of_stream = self.source_exhausted && self.input_offset >= self.input.len();
            let (u, g) = self.resampler.process(
                &self.input[self.input_offset..],
                &mut self.output[..output_samples],
                end_of_stream,
            )?;
            used = u;
            generated = g;
            self.input_offset += used;
            if !(used > 0 && generated == 0) {
                break;
            }
        }

        encode_f32(&self.output[..generated], buffer);
        let mut bytes = generated * F32_SIZE;
        self.position += bytes as u64;

        let length = self.length();
        if length == 0 {
            return Ok(bytes);
        }
        if self.position > length {
            let overflow = (self.position - length) as usize;
            log::warn!(
                "Resampling overflow of {} bytes at end of stream, trimmed",
                overflow
            );
            bytes -= overflow.min(bytes);
            self.position = length;
        } else if self.position < length && used == 0 && bytes == 0 && end_of_stream {
            let padding = ((length - self.position) as usize).min(count);
            log::warn!(
                "Resampling underflow of {} bytes at end of stream, padded with silence",
                length - self.position
            );
            buffer[..padding].fill(0);
            bytes = padding;
            self.position += padding as u64;
        }
        Ok(bytes)
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}
