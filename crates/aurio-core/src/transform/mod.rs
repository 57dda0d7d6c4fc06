//! Short-time Fourier transform over audio streams
//!
//! Frames of `window_size` mono samples are read from the stream, weighted
//! with a Hann window and transformed with `rustfft`. Each frame yields
//! `window_size / 2` magnitude bins on a decibel scale. Consecutive frames
//! start `hop_size` samples apart.

use crate::error::{AudioError, Result};
use crate::streams::samples::{decode_f32, F32_SIZE};
use crate::streams::{read_fully, AudioStream};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Samples pulled from the stream per refill
const READ_CHUNK_SAMPLES: usize = 8192;

/// Windowed FFT over a mono IEEE float stream
pub struct Stft<S> {
    stream: S,
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    samples: Vec<f32>,
    /// Index in `samples` where the next frame starts
    frame_start: usize,
    read_buffer: Vec<u8>,
    decoded: Vec<f32>,
    frame: Vec<Complex<f32>>,
    exhausted: bool,
}

impl<S: AudioStream> Stft<S> {
    pub fn new(stream: S, window_size: usize, hop_size: usize) -> Result<Self> {
        let properties = stream.properties();
        properties.require_ieee_f32("Stft")?;
        if properties.channels() != 1 {
            return Err(AudioError::UnsupportedFormat(format!(
                "STFT requires a mono stream, got {}",
                properties
            )));
        }
        if window_size < 2 || hop_size == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "invalid STFT window {} / hop {}",
                window_size, hop_size
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);

        Ok(Self {
            stream,
            window_size,
            hop_size,
            window: create_hann_window(window_size),
            fft,
            samples: Vec::with_capacity(window_size + READ_CHUNK_SAMPLES),
            frame_start: 0,
            read_buffer: vec![0u8; READ_CHUNK_SAMPLES * F32_SIZE],
            decoded: Vec::with_capacity(READ_CHUNK_SAMPLES),
            frame: vec![Complex::new(0.0, 0.0); window_size],
            exhausted: false,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of magnitude bins per frame
    pub fn bins(&self) -> usize {
        self.window_size / 2
    }

    /// Frames the whole stream yields, 0 if it is shorter than one window
    pub fn window_count(&self) -> usize {
        let samples = (self.stream.length() / F32_SIZE as u64) as usize;
        if samples < self.window_size {
            return 0;
        }
        (samples - self.window_size) / self.hop_size + 1
    }

    /// Makes sure a complete window is buffered, returns false at the end
    fn fill(&mut self) -> Result<bool> {
        while self.samples.len().saturating_sub(self.frame_start) < self.window_size {
            if self.exhausted {
                return Ok(false);
            }
            if self.frame_start > 0 {
                // a hop larger than the window skips samples not read yet
                let drained = self.frame_start.min(self.samples.len());
                self.samples.drain(..drained);
                self.frame_start -= drained;
            }
            let n = read_fully(&mut self.stream, &mut self.read_buffer)?;
            if n < self.read_buffer.len() {
                self.exhausted = true;
            }
            decode_f32(&self.read_buffer[..n], &mut self.decoded);
            self.samples.extend_from_slice(&self.decoded);
        }
        Ok(true)
    }

    /// Computes the next frame's decibel spectrum into `spectrum`.
    ///
    /// `spectrum` must hold [`Stft::bins`] values. Returns false once the
    /// stream has no complete window left.
    pub fn read_frame(&mut self, spectrum: &mut [f32]) -> Result<bool> {
        if spectrum.len() != self.bins() {
            return Err(AudioError::InvalidConfiguration(format!(
                "spectrum buffer holds {} bins, expected {}",
                spectrum.len(),
                self.bins()
            )));
        }
        if !self.fill()? {
            return Ok(false);
        }

        let frame = &self.samples[self.frame_start..self.frame_start + self.window_size];
        for ((c, &s), &w) in self.frame.iter_mut().zip(frame).zip(&self.window) {
            *c = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.frame);

        let scale = self.window_size as f32;
        for (bin, c) in spectrum.iter_mut().zip(&self.frame) {
            *bin = linear_to_decibel(c.norm() / scale * 2.0);
        }

        self.frame_start += self.hop_size;
        Ok(true)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Create a symmetric Hann window
pub fn create_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}

/// Linear magnitude to decibels, silence maps to `f32::MIN`
pub fn linear_to_decibel(value: f32) -> f32 {
    let db = 20.0 * value.log10();
    if db == f32::NEG_INFINITY {
        f32::MIN
    } else {
        db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{MemorySourceStream, SineGeneratorStream};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_hann_window() {
        let window = create_hann_window(512);
        assert_eq!(window.len(), 512);
        assert!((window[0] - 0.0).abs() < 0.001);
        assert!((window[511] - 0.0).abs() < 0.001);
        assert!((window[256] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_decibel_conversion() {
        assert_abs_diff_eq!(linear_to_decibel(1.0), 0.0);
        assert_abs_diff_eq!(linear_to_decibel(0.1), -20.0, epsilon = 1e-4);
        assert_eq!(linear_to_decibel(0.0), f32::MIN);
    }

    #[test]
    fn test_frame_count_matches_window_count() {
        let sine = SineGeneratorStream::new(8000, 440.0, 1.0).unwrap();
        let mut stft = Stft::new(sine, 512, 256).unwrap();
        // 8000 samples: (8000 - 512) / 256 + 1
        assert_eq!(stft.window_count(), 30);

        let mut spectrum = vec![0.0f32; stft.bins()];
        let mut frames = 0;
        while stft.read_frame(&mut spectrum).unwrap() {
            frames += 1;
        }
        assert_eq!(frames, 30);
        assert!(!stft.read_frame(&mut spectrum).unwrap());
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        // bin 32 of a 512 window at 8000 Hz is 500 Hz
        let sine = SineGeneratorStream::new(8000, 500.0, 0.5).unwrap();
        let mut stft = Stft::new(sine, 512, 128).unwrap();
        let mut spectrum = vec![0.0f32; stft.bins()];
        assert!(stft.read_frame(&mut spectrum).unwrap());

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
        // full scale sine through a Hann window, about -6 dB
        assert_abs_diff_eq!(spectrum[32], -6.02, epsilon = 0.2);
    }

    #[test]
    fn test_short_stream_yields_nothing() {
        let stream = MemorySourceStream::from_f32(&[0.5; 100], 1, 8000).unwrap();
        let mut stft = Stft::new(stream, 512, 256).unwrap();
        assert_eq!(stft.window_count(), 0);
        let mut spectrum = vec![0.0f32; 256];
        assert!(!stft.read_frame(&mut spectrum).unwrap());
    }

    #[test]
    fn test_rejects_multichannel_and_bad_buffers() {
        let stereo = MemorySourceStream::from_f32(&[0.0; 64], 2, 8000).unwrap();
        assert!(matches!(
            Stft::new(stereo, 16, 8),
            Err(AudioError::UnsupportedFormat(_))
        ));

        let mono = MemorySourceStream::from_f32(&[0.0; 64], 1, 8000).unwrap();
        assert!(Stft::new(mono.clone(), 16, 0).is_err());
        let mut stft = Stft::new(mono, 16, 8).unwrap();
        let mut wrong = vec![0.0f32; 5];
        assert!(stft.read_frame(&mut wrong).is_err());
    }
}
