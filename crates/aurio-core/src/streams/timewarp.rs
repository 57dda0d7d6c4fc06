//! Non-linear time warping through per-interval resampling

use super::{
    check_aligned, AudioProperties, AudioStream, CropStream, ResamplingStream, INFINITE_LENGTH,
};
use crate::error::{AudioError, Result};
use crate::resampler::{ResamplerFactory, ResamplingQuality, RubatoResamplerFactory};
use crate::timewarp::{TimeWarp, TimeWarpCollection};
use std::sync::Arc;

/// Time warp anchor in byte positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteTimeWarp {
    from: u64,
    to: u64,
}

impl ByteTimeWarp {
    fn convert(warp: &TimeWarp, properties: &AudioProperties) -> Result<Self> {
        let from = properties.time_to_bytes(warp.from);
        let to = properties.time_to_bytes(warp.to);
        if from < 0 || to < 0 {
            return Err(AudioError::InvalidRange(format!(
                "{} maps before the stream start",
                warp
            )));
        }
        Ok(Self {
            from: from as u64,
            to: to as u64,
        })
    }

    fn offset(&self) -> i64 {
        self.to as i64 - self.from as i64
    }

    fn ratio(lower: &ByteTimeWarp, upper: &ByteTimeWarp) -> f64 {
        let warped = upper.to as f64 - lower.to as f64;
        let source = upper.from as f64 - lower.from as f64;
        if warped == 0.0 && source == 0.0 {
            // empty interval of an empty source
            1.0
        } else {
            warped / source
        }
    }
}

/// Stretches and compresses a source along a piecewise-linear time mapping.
///
/// The anchors split the source into intervals; each interval is cropped out
/// of the source and resampled at the interval's ratio. Boundary anchors at
/// the stream start and end are added so the whole source is covered. An
/// empty mapping passes the source through unchanged.
///
/// Crossing an interval boundary during playback reuses the crop and the
/// variable-rate converter (soft reset), while a new mapping replaces the
/// converter (hard reset).
pub struct TimeWarpStream<S> {
    resampling: ResamplingStream<CropStream<S>>,
    factory: Arc<dyn ResamplerFactory>,
    warps: Vec<ByteTimeWarp>,
    /// Index of the lower anchor of the active interval
    lower: usize,
    source_length: u64,
    length: u64,
    position: u64,
}

impl<S: AudioStream> TimeWarpStream<S> {
    pub fn new(source: S) -> Result<Self> {
        Self::with_factory(source, Arc::new(RubatoResamplerFactory))
    }

    pub fn with_mappings(source: S, mappings: &TimeWarpCollection) -> Result<Self> {
        let mut stream = Self::new(source)?;
        stream.set_mappings(mappings)?;
        Ok(stream)
    }

    pub fn with_factory(source: S, factory: Arc<dyn ResamplerFactory>) -> Result<Self> {
        source.properties().require_ieee_f32("TimeWarpStream")?;
        let source_length = source.length();
        if source_length == INFINITE_LENGTH {
            return Err(AudioError::InvalidConfiguration(
                "time warping needs a source of known length".to_string(),
            ));
        }
        let crop = CropStream::new(source, 0, source_length)?;
        let resampling = ResamplingStream::with_factory(
            crop,
            ResamplingQuality::VariableRate,
            1.0,
            Arc::clone(&factory),
        )?;

        Ok(Self {
            resampling,
            factory,
            warps: identity(source_length),
            lower: 0,
            source_length,
            length: source_length,
            position: 0,
        })
    }

    /// Replaces the time mapping; the position is kept unless it lies beyond the new end
    pub fn set_mappings(&mut self, mappings: &TimeWarpCollection) -> Result<()> {
        let warps = self.convert(mappings)?;
        log::debug!(
            "TimeWarpStream mapping replaced: {} anchors, length {} -> {}",
            warps.len(),
            self.length,
            warps[warps.len() - 1].to
        );
        self.warps = warps;
        let end = self.warps[self.warps.len() - 1].to;
        if self.position > end {
            self.position = end;
        }
        self.reset(true)
    }

    fn convert(&self, mappings: &TimeWarpCollection) -> Result<Vec<ByteTimeWarp>> {
        if mappings.is_empty() {
            return Ok(identity(self.source_length));
        }

        let properties = self.properties();
        let mut warps = Vec::with_capacity(mappings.len() + 2);
        for warp in mappings {
            let converted = ByteTimeWarp::convert(warp, &properties)?;
            if converted.from > self.source_length {
                return Err(AudioError::InvalidRange(format!(
                    "{} lies beyond the source end",
                    warp
                )));
            }
            warps.push(converted);
        }

        let first = warps[0];
        if first.from > 0 {
            warps.insert(0, ByteTimeWarp { from: 0, to: 0 });
        } else if first.to != 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "an anchor at the source start must map to 0, not {}",
                first.to
            )));
        }
        let last = warps[warps.len() - 1];
        if last.from < self.source_length {
            warps.push(ByteTimeWarp {
                from: self.source_length,
                to: (self.source_length as i64 + last.offset()) as u64,
            });
        }
        if warps.len() < 2 {
            return Ok(identity(self.source_length));
        }

        for pair in warps.windows(2) {
            let ratio = ByteTimeWarp::ratio(&pair[0], &pair[1]);
            if !self.factory.check_ratio(ratio) {
                return Err(AudioError::InvalidConfiguration(format!(
                    "interval {:?} -> {:?} implies unsupported ratio {}",
                    pair[0], pair[1], ratio
                )));
            }
        }
        Ok(warps)
    }

    /// Index of the interval containing a warped position, the last one at the end
    fn locate(&self, position: u64) -> usize {
        let intervals = self.warps.len() - 1;
        (0..intervals)
            .find(|&i| position >= self.warps[i].to && position < self.warps[i + 1].to)
            .unwrap_or(intervals - 1)
    }

    fn reset(&mut self, hard: bool) -> Result<()> {
        let end = self.warps[self.warps.len() - 1].to;
        if self.position > end {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond length {}",
                self.position, end
            )));
        }
        self.length = end;
        self.lower = self.locate(self.position);
        let lower = self.warps[self.lower];
        let upper = self.warps[self.lower + 1];
        let ratio = ByteTimeWarp::ratio(&lower, &upper);

        let crop = self.resampling.get_ref();
        if hard || crop.begin() != lower.from || crop.end() != upper.from {
            log::debug!(
                "TimeWarpStream {} reset: source [{}, {}) ratio {}",
                if hard { "hard" } else { "soft" },
                lower.from,
                upper.from,
                ratio
            );
            self.resampling.get_mut().set_range(lower.from, upper.from)?;
            if hard {
                self.resampling.rebuild(ratio)?;
            } else {
                self.resampling.get_mut().set_position(0)?;
                self.resampling.set_sample_rate_ratio(ratio)?;
            }
        }
        self.resampling.set_position(self.position - lower.to)
    }

    pub fn get_ref(&self) -> &S {
        self.resampling.get_ref().get_ref()
    }

    pub fn into_inner(self) -> S {
        self.resampling.into_inner().into_inner()
    }
}

fn identity(length: u64) -> Vec<ByteTimeWarp> {
    vec![
        ByteTimeWarp { from: 0, to: 0 },
        ByteTimeWarp {
            from: length,
            to: length,
        },
    ]
}

impl<S: AudioStream> AudioStream for TimeWarpStream<S> {
    fn properties(&self) -> AudioProperties {
        self.get_ref().properties()
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        check_aligned(position, self.sample_block_size(), "position")?;
        if position > self.length {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond length {}",
                position, self.length
            )));
        }
        let lower = self.warps[self.lower];
        let upper = self.warps[self.lower + 1];
        self.position = position;
        if position < lower.to || position >= upper.to {
            self.reset(false)
        } else {
            self.resampling.set_position(position - lower.to)
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        if buffer.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.resampling.read(buffer)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            if self.resampling.get_ref().end() == self.source_length {
                return Ok(0);
            }
            // Continue with the next interval
            let upper = self.warps[self.lower + 1];
            if self.position < upper.to {
                log::debug!(
                    "TimeWarpStream interval ended {} bytes early, skipping to {}",
                    upper.to - self.position,
                    upper.to
                );
                self.position = upper.to;
            }
            self.reset(false)?;
        }
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(self.get_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resampler::nearest;
    use crate::streams::samples::f32_at;
    use crate::streams::{read_to_end, MemorySourceStream, NullStream};

    fn null_source(seconds: u64) -> NullStream {
        let properties = AudioProperties::ieee(2, 8000).unwrap();
        NullStream::new(properties, seconds * 8000 * 8).unwrap()
    }

    fn ramp(frames: usize, sample_rate: u32) -> MemorySourceStream {
        let samples: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        MemorySourceStream::from_f32(&samples, 1, sample_rate).unwrap()
    }

    fn read_all_counting(stream: &mut dyn AudioStream) -> u64 {
        let mut buffer = [0u8; 5000];
        let mut total = 0;
        loop {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                return total;
            }
            total += n as u64;
        }
    }

    #[test]
    fn test_empty_mapping_is_identity() {
        let mut stream =
            TimeWarpStream::with_mappings(ramp(1000, 1000), &TimeWarpCollection::new()).unwrap();
        assert_eq!(stream.length(), 4000);
        assert_eq!(stream.position(), 0);

        let data = read_to_end(&mut stream, 36).unwrap();
        assert_eq!(data, ramp(1000, 1000).data());
        assert_eq!(stream.position(), stream.length());

        stream.set_position(400).unwrap();
        let mut buffer = [0u8; 4];
        stream.read(&mut buffer).unwrap();
        assert_eq!(f32_at(&buffer, 0), 100.0);
    }

    #[test]
    fn test_compressed_mapping_reads_to_length() {
        let mut mappings = TimeWarpCollection::new();
        mappings
            .add_range([TimeWarp::new(1.0, 0.5), TimeWarp::new(2.0, 1.0)])
            .unwrap();
        let mut stream = TimeWarpStream::with_mappings(null_source(2), &mappings).unwrap();
        assert_eq!(stream.length(), 64000);
        assert_eq!(stream.position(), 0);

        let total = read_all_counting(&mut stream);
        assert_eq!(total, stream.length());
        assert_eq!(stream.position(), stream.length());
    }

    #[test]
    fn test_seek_then_read_to_end() {
        let mut mappings = TimeWarpCollection::new();
        mappings.add(TimeWarp::new(2.0, 1.0)).unwrap();
        let mut stream = TimeWarpStream::with_mappings(null_source(2), &mappings).unwrap();

        stream.set_position(11104).unwrap();
        assert_eq!(stream.position(), 11104);
        let total = read_all_counting(&mut stream);
        assert_eq!(total, stream.position() - 11104);
        assert_eq!(stream.position(), stream.length());
    }

    #[test]
    fn test_repositioning_during_playback() {
        let mut mappings = TimeWarpCollection::new();
        mappings
            .add_range([TimeWarp::new(1.0, 0.5), TimeWarp::new(2.0, 1.0)])
            .unwrap();
        let mut stream = TimeWarpStream::with_mappings(null_source(2), &mappings).unwrap();

        let mut buffer = [0u8; 5000];
        stream.read(&mut buffer).unwrap();
        stream.set_position(44440).unwrap();
        let mut count = 0;
        while stream.read(&mut buffer).unwrap() > 0 {
            count += 1;
            if count == 2 {
                let before = stream.position();
                stream.set_position(before).unwrap();
                assert_eq!(stream.position(), before);
            }
        }
        assert!(count > 2);
        assert_eq!(stream.position(), stream.length());
    }

    #[test]
    fn test_interval_sample_mapping() {
        let mut stream =
            TimeWarpStream::with_factory(ramp(1000, 1000), nearest::factory()).unwrap();
        let mut mappings = TimeWarpCollection::new();
        mappings.add(TimeWarp::new(0.5, 0.25)).unwrap();
        stream.set_mappings(&mappings).unwrap();
        // [0, 0.5s) is compressed to [0, 0.25s), the rest keeps its rate
        assert_eq!(stream.length(), 750 * 4);

        let data = read_to_end(&mut stream, 64).unwrap();
        assert_eq!(data.len(), 3000);
        assert_eq!(f32_at(&data, 100), 200.0);
        assert_eq!(f32_at(&data, 249), 498.0);
        assert_eq!(f32_at(&data, 250), 500.0);
        assert_eq!(f32_at(&data, 749), 999.0);

        stream.set_position(1200).unwrap();
        let mut buffer = [0u8; 4];
        stream.read(&mut buffer).unwrap();
        assert_eq!(f32_at(&buffer, 0), 550.0);
    }

    #[test]
    fn test_invalid_mappings_rejected() {
        let mut stream = TimeWarpStream::new(null_source(2)).unwrap();

        let mut mappings = TimeWarpCollection::new();
        mappings.add(TimeWarp::new(0.0, 0.5)).unwrap();
        assert!(matches!(
            stream.set_mappings(&mappings),
            Err(AudioError::InvalidConfiguration(_))
        ));

        let mut mappings = TimeWarpCollection::new();
        mappings.add(TimeWarp::new(3.0, 3.0)).unwrap();
        assert!(matches!(
            stream.set_mappings(&mappings),
            Err(AudioError::InvalidRange(_))
        ));
        assert_eq!(stream.length(), 2 * 8000 * 8);
    }

    #[test]
    fn test_start_anchor_must_map_to_zero() {
        let mut stream = TimeWarpStream::new(null_source(2)).unwrap();
        let mut shifted = TimeWarpCollection::new();
        shifted
            .add_range([TimeWarp::new(0.0, 0.25), TimeWarp::new(1.0, 1.25)])
            .unwrap();
        assert!(matches!(
            stream.set_mappings(&shifted),
            Err(AudioError::InvalidConfiguration(_))
        ));
        // the previous mapping stays active
        assert_eq!(stream.length(), 2 * 8000 * 8);

        let mut anchored = TimeWarpCollection::new();
        anchored
            .add_range([TimeWarp::new(0.0, 0.0), TimeWarp::new(1.0, 1.25)])
            .unwrap();
        stream.set_mappings(&anchored).unwrap();
        assert_eq!(stream.length(), (2.25 * 8000.0) as u64 * 8);
    }

    #[test]
    fn test_requires_float_input() {
        let properties =
            AudioProperties::new(1, 8000, 16, crate::streams::SampleFormat::Lpcm).unwrap();
        let source = NullStream::new(properties, 100).unwrap();
        assert!(TimeWarpStream::new(source).is_err());
    }
}
