//! Sub-fingerprint extraction from spectral peak pairs

use super::{Profile, SubFingerprint};
use crate::error::Result;
use crate::resampler::ResamplingQuality;
use crate::streams::{AudioStream, IeeeStream, MonoStream, ResamplingStream};
use crate::transform::Stft;
use std::collections::VecDeque;

/// Frames whose mean level is below this are silence and skipped
const SILENCE_THRESHOLD_DB: f64 = -200.0;

/// Subtracted from the spectrum together with the running average
const RESIDUAL_OFFSET_DB: f32 = 90.0;

/// Sub-fingerprints are handed out once a batch grows beyond this
const BATCH_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Peak {
    pub index: usize,
    pub value: f32,
}

#[derive(Debug, Clone, Copy)]
struct PeakPair {
    peak1: Peak,
    peak2: Peak,
    /// Frames between the two peaks
    distance: usize,
}

impl PeakPair {
    fn average_energy(&self) -> f32 {
        (self.peak1.value + self.peak2.value) / 2.0
    }

    /// `bin1 << 16 | bin2 << 8 | distance`, each field truncated to a byte
    fn hash(&self) -> u32 {
        (self.peak1.index as u8 as u32) << 16
            | (self.peak2.index as u8 as u32) << 8
            | self.distance as u8 as u32
    }
}

/// Appends the first index of every plateau that rises above its predecessor
/// and later falls
pub(crate) fn find_local_maxima(data: &[f32], peaks: &mut Vec<Peak>) {
    let mut last = f32::MIN;
    let mut anchor: Option<usize> = None;
    for (i, &value) in data.iter().enumerate() {
        if value > last {
            anchor = Some(i);
        } else if value < last {
            if let Some(index) = anchor.take() {
                peaks.push(Peak { index, value: last });
            }
        }
        last = value;
    }
}

/// Peaks of the most recent frames, oldest first
struct PeakHistory {
    frames: VecDeque<(Option<u32>, Vec<Peak>)>,
}

impl PeakHistory {
    fn new(depth: usize) -> Self {
        Self {
            frames: (0..depth).map(|_| (None, Vec::new())).collect(),
        }
    }

    /// Evicts the oldest frame and returns its peak list for reuse
    fn recycle(&mut self) -> Vec<Peak> {
        let mut peaks = self
            .frames
            .pop_front()
            .map(|(_, peaks)| peaks)
            .unwrap_or_default();
        peaks.clear();
        peaks
    }

    fn push(&mut self, index: Option<u32>, peaks: Vec<Peak>) {
        self.frames.push_back((index, peaks));
    }
}

/// Extracts Wang-2003 sub-fingerprints from audio streams
#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    profile: Profile,
    quality: ResamplingQuality,
}

impl FingerprintGenerator {
    pub fn new(profile: Profile) -> Result<Self> {
        profile.validate()?;
        if !profile.hash_fields_fit_byte() {
            log::debug!(
                "Profile '{}' truncates hash fields to their low byte",
                profile.name
            );
        }
        Ok(Self {
            profile,
            quality: ResamplingQuality::Medium,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn set_resampling_quality(&mut self, quality: ResamplingQuality) {
        self.quality = quality;
    }

    /// Fingerprints `stream`, delivering sub-fingerprints in batches.
    ///
    /// The stream is converted to float, mixed down to mono and resampled to
    /// the profile's rate first. Returns the number of analysis frames.
    pub fn generate<S, F>(&self, stream: S, on_batch: F) -> Result<usize>
    where
        S: AudioStream + 'static,
        F: FnMut(&[SubFingerprint]),
    {
        let stream: Box<dyn AudioStream> = if stream.properties().is_ieee_f32() {
            Box::new(stream)
        } else {
            Box::new(IeeeStream::new(stream)?)
        };
        let mono = MonoStream::new(stream, 1)?;
        let resampled = ResamplingStream::new(mono, self.quality, self.profile.sample_rate)?;
        self.generate_from_analysis_stream(resampled, on_batch)
    }

    /// Collects all sub-fingerprints of `stream` in frame order
    pub fn generate_all<S: AudioStream + 'static>(&self, stream: S) -> Result<Vec<SubFingerprint>> {
        let mut sub_fingerprints = Vec::new();
        self.generate(stream, |batch| sub_fingerprints.extend_from_slice(batch))?;
        Ok(sub_fingerprints)
    }

    /// Runs the peak pairing over a mono float stream at the profile's rate
    pub(crate) fn generate_from_analysis_stream<S, F>(&self, stream: S, mut on_batch: F) -> Result<usize>
    where
        S: AudioStream,
        F: FnMut(&[SubFingerprint]),
    {
        let p = &self.profile;
        let mut stft = Stft::new(stream, p.window_size, p.hop_size)?;
        let bins = stft.bins();
        let frames = stft.window_count();

        let history_depth = 1 + p.target_zone_distance + p.target_zone_length;
        let mut history = PeakHistory::new(history_depth);
        let mut spectrum = vec![0.0f32; bins];
        let mut smoothed = vec![0.0f32; bins];
        let mut average: Option<Vec<f32>> = None;
        let mut residual = vec![0.0f32; bins];
        let mut maxima = Vec::new();
        let mut pairs = Vec::new();
        let mut hashes = Vec::new();
        let mut batch = Vec::with_capacity(BATCH_SIZE + 1);
        let mut index: u32 = 0;
        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut emitted = 0usize;

        while stft.read_frame(&mut spectrum)? {
            let mean = spectrum.iter().map(|&v| v as f64).sum::<f64>() / bins as f64;
            if mean < SILENCE_THRESHOLD_DB {
                index += 1;
                skipped += 1;
                continue;
            }

            let spectrum = if p.spectrum_smoothing_length > 1 {
                moving_average(&spectrum, p.spectrum_smoothing_length, &mut smoothed);
                &smoothed
            } else {
                &spectrum
            };

            let alpha = p.spectrum_temporal_smoothing_coefficient;
            let average = average.get_or_insert_with(|| spectrum.clone());
            for ((avg, &x), r) in average.iter_mut().zip(spectrum).zip(residual.iter_mut()) {
                *avg += alpha * (x - *avg);
                *r = x - *avg - RESIDUAL_OFFSET_DB;
            }

            maxima.clear();
            find_local_maxima(&residual, &mut maxima);
            maxima.sort_by(|a, b| b.value.total_cmp(&a.value));
            maxima.truncate(p.peaks_per_frame);
            maxima.sort_by_key(|peak| peak.index);

            let mut peaks = history.recycle();
            peaks.extend_from_slice(&maxima);
            history.push(Some(index), peaks);
            processed += 1;
            index += 1;

            if processed >= history_depth {
                self.pair_oldest(&history, &mut pairs, &mut hashes, &mut batch);
            }
            if batch.len() > BATCH_SIZE {
                emitted += batch.len();
                on_batch(&batch);
                batch.clear();
            }
        }

        // drain the target zones of the last frames
        for _ in 0..p.target_zone_length {
            let peaks = history.recycle();
            history.push(None, peaks);
            self.pair_oldest(&history, &mut pairs, &mut hashes, &mut batch);
        }
        if !batch.is_empty() {
            emitted += batch.len();
            on_batch(&batch);
        }

        log::debug!(
            "Fingerprinted {} frames ({} silent): {} sub-fingerprints",
            frames,
            skipped,
            emitted
        );
        Ok(frames)
    }

    /// Pairs the oldest frame's peaks with its target zone and emits the hashes
    fn pair_oldest(
        &self,
        history: &PeakHistory,
        pairs: &mut Vec<PeakPair>,
        hashes: &mut Vec<u32>,
        batch: &mut Vec<SubFingerprint>,
    ) {
        let p = &self.profile;
        let Some((Some(index), oldest)) = history.frames.front() else {
            return;
        };
        let half_width = p.target_zone_width / 2;

        pairs.clear();
        for (distance, (_, targets)) in history
            .frames
            .iter()
            .enumerate()
            .skip(p.target_zone_distance)
        {
            for target in targets {
                let low = target.index.saturating_sub(half_width);
                let high = target.index + half_width;
                for peak in oldest {
                    if peak.index >= low && peak.index <= high {
                        pairs.push(PeakPair {
                            peak1: *peak,
                            peak2: *target,
                            distance,
                        });
                    }
                }
            }
        }
        if pairs.is_empty() {
            return;
        }

        // the strongest pairs make the most distinctive hashes
        pairs.sort_by(|a, b| b.average_energy().total_cmp(&a.average_energy()));
        pairs.truncate(p.peak_fanout);

        hashes.clear();
        hashes.extend(pairs.iter().map(PeakPair::hash));
        hashes.sort_unstable();
        log::trace!("Frame {}: {} hashes", index, hashes.len());
        batch.extend(hashes.iter().map(|&hash| SubFingerprint {
            index: *index,
            hash,
        }));
    }
}

/// Trailing moving average over `length` bins, same length as the input
fn moving_average(data: &[f32], length: usize, out: &mut [f32]) {
    let mut sum = 0.0f32;
    for (i, &value) in data.iter().enumerate() {
        sum += value;
        if i >= length {
            sum -= data[i - length];
        }
        out[i] = sum / (i + 1).min(length) as f32;
    }
}
