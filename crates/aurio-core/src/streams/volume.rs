//! Sample clipping

use super::samples::{f32_at, put_f32, F32_SIZE};
use super::{AudioProperties, AudioStream};
use crate::error::Result;

/// Clips float samples to `[-1, 1]`, typically placed after a mixer.
pub struct VolumeClipStream<S> {
    source: S,
    clip: bool,
}

impl<S: AudioStream> VolumeClipStream<S> {
    pub fn new(source: S) -> Result<Self> {
        source.properties().require_ieee_f32("VolumeClipStream")?;
        Ok(Self { source, clip: true })
    }

    pub fn clip(&self) -> bool {
        self.clip
    }

    pub fn set_clip(&mut self, clip: bool) {
        self.clip = clip;
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: AudioStream> AudioStream for VolumeClipStream<S> {
    fn properties(&self) -> AudioProperties {
        self.source.properties()
    }

    fn length(&self) -> u64 {
        self.source.length()
    }

    fn position(&self) -> u64 {
        self.source.position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.source.set_position(position)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.source.read(buffer)?;
        if self.clip {
            for i in 0..n / F32_SIZE {
                let sample = f32_at(buffer, i);
                if !(-1.0..=1.0).contains(&sample) {
                    put_f32(buffer, i, sample.clamp(-1.0, 1.0));
                }
            }
        }
        Ok(n)
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}
