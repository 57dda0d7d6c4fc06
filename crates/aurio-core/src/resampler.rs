//! Sample rate converter contract and its rubato implementation
//!
//! Streams talk to converters through the narrow [`Resampler`] push/pull
//! contract over interleaved float samples. [`RubatoResamplerFactory`] builds
//! converters backed by the `rubato` crate.

use crate::error::{AudioError, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as _, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Converter quality, `VariableRate` supports smooth ratio changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingQuality {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    VariableRate,
}

/// Streaming sample rate converter.
///
/// Sample counts are interleaved float samples and always multiples of the
/// channel count.
pub trait Resampler: Send {
    /// Consumes input and produces output, returns `(input_used, output_generated)`.
    ///
    /// With `end_of_input` set, the converter flushes its internal delay line.
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        end_of_input: bool,
    ) -> Result<(usize, usize)>;

    /// Drops all buffered state; the ratio is kept
    fn clear(&mut self) -> Result<()>;

    /// Changes the conversion ratio (output rate / input rate)
    fn set_ratio(&mut self, ratio: f64) -> Result<()>;

    fn ratio(&self) -> f64;

    /// Converter latency in output frames
    fn output_delay(&self) -> usize;
}

/// Creates converters and tells which ratios they accept
pub trait ResamplerFactory: Send + Sync {
    fn check_ratio(&self, ratio: f64) -> bool {
        check_ratio(ratio)
    }

    fn create(
        &self,
        quality: ResamplingQuality,
        channels: usize,
        ratio: f64,
    ) -> Result<Box<dyn Resampler>>;
}

/// Ratios every converter accepts: finite and positive
pub fn check_ratio(ratio: f64) -> bool {
    ratio.is_finite() && ratio > 0.0
}

/// Input frames handed to rubato per processing call
const CHUNK_FRAMES: usize = 1024;
/// Relative ratio range of variable-rate converters before a rebuild is needed
const VARIABLE_RATIO_RANGE: f64 = 10.0;
/// Upper bound for flush calls at end of input
const MAX_FLUSH_ROUNDS: usize = 16;

/// Factory for rubato-backed converters
#[derive(Debug, Clone, Copy, Default)]
pub struct RubatoResamplerFactory;

impl ResamplerFactory for RubatoResamplerFactory {
    fn create(
        &self,
        quality: ResamplingQuality,
        channels: usize,
        ratio: f64,
    ) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(RubatoResampler::new(quality, channels, ratio)?))
    }
}

enum Converter {
    Sinc(SincFixedIn<f32>),
    Fast(FastFixedIn<f32>),
}

macro_rules! dispatch {
    ($converter:expr, $inner:ident => $body:expr) => {
        match $converter {
            Converter::Sinc($inner) => $body,
            Converter::Fast($inner) => $body,
        }
    };
}

impl Converter {
    fn build(quality: ResamplingQuality, channels: usize, ratio: f64) -> Result<Self> {
        let relative = match quality {
            ResamplingQuality::VariableRate => VARIABLE_RATIO_RANGE,
            _ => 1.0,
        };
        let sinc = |sinc_len: usize, interpolation: SincInterpolationType| -> Result<Converter> {
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: 0.95,
                oversampling_factor: sinc_len,
                interpolation,
                window: WindowFunction::BlackmanHarris2,
            };
            Ok(Converter::Sinc(SincFixedIn::<f32>::new(
                ratio,
                relative,
                params,
                CHUNK_FRAMES,
                channels,
            )?))
        };
        match quality {
            ResamplingQuality::VeryLow => Ok(Converter::Fast(FastFixedIn::<f32>::new(
                ratio,
                relative,
                PolynomialDegree::Linear,
                CHUNK_FRAMES,
                channels,
            )?)),
            ResamplingQuality::Low => Ok(Converter::Fast(FastFixedIn::<f32>::new(
                ratio,
                relative,
                PolynomialDegree::Cubic,
                CHUNK_FRAMES,
                channels,
            )?)),
            ResamplingQuality::Medium => sinc(64, SincInterpolationType::Linear),
            ResamplingQuality::High | ResamplingQuality::VariableRate => {
                sinc(128, SincInterpolationType::Linear)
            }
            ResamplingQuality::VeryHigh => sinc(256, SincInterpolationType::Cubic),
        }
    }

    fn input_frames_next(&self) -> usize {
        dispatch!(self, r => r.input_frames_next())
    }

    fn output_delay(&self) -> usize {
        dispatch!(self, r => r.output_delay())
    }

    fn process(&mut self, chunk: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        Ok(dispatch!(self, r => r.process(chunk, None)?))
    }

    fn process_partial(&mut self, chunk: Option<&[Vec<f32>]>) -> Result<Vec<Vec<f32>>> {
        Ok(dispatch!(self, r => r.process_partial(chunk, None)?))
    }

    fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        Ok(dispatch!(self, r => r.set_resample_ratio(ratio, false)?))
    }

    fn reset(&mut self) {
        dispatch!(self, r => r.reset())
    }
}

/// Streaming adapter around a rubato fixed-input converter.
///
/// Input is staged per channel until a full chunk is available, the
/// converter's own latency is cut from the front of the output, and at the
/// end of input the remaining samples are flushed until the output matches the
/// consumed input times the ratio.
pub struct RubatoResampler {
    converter: Converter,
    quality: ResamplingQuality,
    channels: usize,
    ratio: f64,
    /// Ratio the current converter was built with
    base_ratio: f64,
    staging: Vec<Vec<f32>>,
    pending: VecDeque<f32>,
    /// Output frames still to drop for the converter delay
    skip: usize,
    /// Output frames owed for all input consumed since the last clear
    expected: f64,
    /// Output frames handed out since the last clear
    emitted: u64,
    flushed: bool,
}

impl RubatoResampler {
    pub fn new(quality: ResamplingQuality, channels: usize, ratio: f64) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "resampler needs at least one channel".to_string(),
            ));
        }
        if !check_ratio(ratio) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported resampling ratio {}",
                ratio
            )));
        }
        let converter = Converter::build(quality, channels, ratio)?;
        let skip = converter.output_delay();
        Ok(Self {
            converter,
            quality,
            channels,
            ratio,
            base_ratio: ratio,
            staging: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            pending: VecDeque::new(),
            skip,
            expected: 0.0,
            emitted: 0,
            flushed: false,
        })
    }

    pub fn quality(&self) -> ResamplingQuality {
        self.quality
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    fn staged_frames(&self) -> usize {
        self.staging[0].len()
    }

    fn take_staged(&mut self, frames: usize) -> Vec<Vec<f32>> {
        self.staging
            .iter_mut()
            .map(|channel| channel.drain(..frames).collect())
            .collect()
    }

    fn push_output(&mut self, output: Vec<Vec<f32>>) {
        let frames = output.first().map_or(0, |c| c.len());
        let dropped = self.skip.min(frames);
        self.skip -= dropped;
        for frame in dropped..frames {
            for channel in output.iter() {
                self.pending.push_back(channel[frame]);
            }
        }
    }

    fn owed_frames(&self) -> u64 {
        (self.expected.ceil() as u64).saturating_sub(self.emitted)
    }

    fn flush(&mut self) -> Result<()> {
        if self.staged_frames() > 0 {
            let frames = self.staged_frames();
            let chunk = self.take_staged(frames);
            let output = self.converter.process_partial(Some(chunk.as_slice()))?;
            self.push_output(output);
        }
        let mut rounds = 0;
        while (self.pending_frames() as u64) < self.owed_frames() && rounds < MAX_FLUSH_ROUNDS {
            let output = self.converter.process_partial(None)?;
            self.push_output(output);
            rounds += 1;
        }
        let owed = self.owed_frames() as usize;
        if self.pending_frames() > owed {
            self.pending.truncate(owed * self.channels);
        }
        self.flushed = true;
        Ok(())
    }

    fn rebuild(&mut self, ratio: f64) -> Result<()> {
        log::debug!(
            "Rebuilding {:?} converter for ratio {} (was built for {})",
            self.quality,
            ratio,
            self.base_ratio
        );
        self.converter = Converter::build(self.quality, self.channels, ratio)?;
        self.base_ratio = ratio;
        self.skip = self.converter.output_delay();
        for channel in self.staging.iter_mut() {
            channel.clear();
        }
        Ok(())
    }
}

impl Resampler for RubatoResampler {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        end_of_input: bool,
    ) -> Result<(usize, usize)> {
        let channels = self.channels;
        let wanted = output.len() / channels;

        let mut used_frames = 0;
        if !self.flushed && self.pending_frames() < wanted {
            used_frames = input.len() / channels;
            for frame in input[..used_frames * channels].chunks_exact(channels) {
                for (staged, &sample) in self.staging.iter_mut().zip(frame) {
                    staged.push(sample);
                }
            }
            self.expected += used_frames as f64 * self.ratio;

            while self.staged_frames() >= self.converter.input_frames_next() {
                let frames = self.converter.input_frames_next();
                let chunk = self.take_staged(frames);
                let produced = self.converter.process(&chunk)?;
                self.push_output(produced);
            }
        }

        if end_of_input && !self.flushed && used_frames == 0 {
            self.flush()?;
        }

        let frames = wanted.min(self.pending_frames());
        for (slot, sample) in output[..frames * channels]
            .iter_mut()
            .zip(self.pending.drain(..frames * channels))
        {
            *slot = sample;
        }
        self.emitted += frames as u64;
        Ok((used_frames * channels, frames * channels))
    }

    fn clear(&mut self) -> Result<()> {
        self.converter.reset();
        if self.ratio != self.base_ratio {
            // reset() restores the construction ratio
            if self.converter.set_ratio(self.ratio).is_err() {
                self.rebuild(self.ratio)?;
            }
        }
        for channel in self.staging.iter_mut() {
            channel.clear();
        }
        self.pending.clear();
        self.skip = self.converter.output_delay();
        self.expected = 0.0;
        self.emitted = 0;
        self.flushed = false;
        Ok(())
    }

    fn set_ratio(&mut self, ratio: f64) -> Result<()> {
        if !check_ratio(ratio) {
            return Err(AudioError::InvalidConfiguration(format!(
                "unsupported resampling ratio {}",
                ratio
            )));
        }
        if ratio == self.ratio {
            return Ok(());
        }
        let in_range = self.quality == ResamplingQuality::VariableRate
            && ratio <= self.base_ratio * VARIABLE_RATIO_RANGE
            && ratio >= self.base_ratio / VARIABLE_RATIO_RANGE;
        if !in_range || self.converter.set_ratio(ratio).is_err() {
            self.rebuild(ratio)?;
        }
        self.ratio = ratio;
        Ok(())
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }

    fn output_delay(&self) -> usize {
        self.converter.output_delay()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn run(resampler: &mut dyn Resampler, input: &[f32], block: usize) -> Vec<f32> {
        let mut output = Vec::new();
        let mut out = vec![0.0f32; block];
        let mut offset = 0;
        loop {
            let end = (offset + block).min(input.len());
            let eoi = offset >= input.len();
            let (used, generated) = resampler.process(&input[offset..end], &mut out, eoi).unwrap();
            offset += used;
            output.extend_from_slice(&out[..generated]);
            if eoi && generated == 0 {
                break;
            }
        }
        output
    }

    #[test]
    fn test_check_ratio() {
        assert!(check_ratio(0.5));
        assert!(check_ratio(2.0));
        assert!(!check_ratio(0.0));
        assert!(!check_ratio(-1.0));
        assert!(!check_ratio(f64::NAN));
        assert!(!check_ratio(f64::INFINITY));
    }

    #[test]
    fn test_rubato_output_length_follows_ratio() {
        let input: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin()).collect();
        for quality in [ResamplingQuality::Low, ResamplingQuality::High] {
            let mut resampler = RubatoResampler::new(quality, 1, 0.25).unwrap();
            let output = run(&mut resampler, &input, 4096);
            let expected = (44100.0f64 * 0.25).ceil() as i64;
            assert!(
                (output.len() as i64 - expected).abs() <= 1,
                "{:?}: {} frames, expected {}",
                quality,
                output.len(),
                expected
            );
        }
    }

    #[test]
    fn test_rubato_preserves_signal_level() {
        // 100 Hz at 8000 Hz upsampled by 2
        let input: Vec<f32> = (0..8000)
            .map(|i| (i as f32 / 80.0 * std::f32::consts::TAU).sin())
            .collect();
        let mut resampler = RubatoResampler::new(ResamplingQuality::High, 1, 2.0).unwrap();
        let output = run(&mut resampler, &input, 1000);
        let peak = output[1000..15000]
            .iter()
            .fold(0.0f32, |max, s| max.max(s.abs()));
        assert!(peak > 0.9 && peak < 1.1, "peak {}", peak);
    }

    #[test]
    fn test_rubato_variable_ratio_and_clear() {
        let input = vec![0.5f32; 2 * 10000];
        let mut resampler = RubatoResampler::new(ResamplingQuality::VariableRate, 2, 1.0).unwrap();
        resampler.set_ratio(1.5).unwrap();
        assert_eq!(resampler.ratio(), 1.5);
        let output = run(&mut resampler, &input, 2000);
        assert!((output.len() as i64 - 30000).abs() <= 2);

        resampler.clear().unwrap();
        assert_eq!(resampler.ratio(), 1.5);
        // far outside the variable range forces a rebuild
        resampler.set_ratio(40.0).unwrap();
        assert!(resampler.set_ratio(0.0).is_err());
    }

    #[test]
    fn test_nearest_resampler_exact_counts() {
        let mut resampler = nearest::factory()
            .create(ResamplingQuality::VariableRate, 1, 0.5)
            .unwrap();
        let input: Vec<f32> = (0..101).map(|i| i as f32).collect();
        let output = run(resampler.as_mut(), &input, 16);
        assert_eq!(output.len(), 51);
        assert_eq!(output[1], 2.0);
    }
}
