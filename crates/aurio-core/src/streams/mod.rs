//! Composable byte-addressed audio streams
//!
//! Every transform implements [`AudioStream`] and owns the stream it wraps, so a
//! processing pipeline is a chain of nested values (e.g.
//! `ResamplingStream<MonoStream<IeeeStream<WavFileStream>>>`). Positions and
//! lengths are byte offsets; a sample block (one sample per channel) is the
//! alignment unit.

mod buffered;
mod crop;
mod fifo;
mod ieee;
mod memory;
mod mixer;
mod mono;
mod monitor;
mod properties;
mod resampling;
pub mod samples;
mod sine;
mod timewarp;
mod volume;
mod wav;

pub use buffered::BufferedStream;
pub use crop::CropStream;
pub use fifo::{BlockingFixedLengthFifoStream, FifoWriter};
pub use ieee::IeeeStream;
pub use memory::{MemorySourceStream, NullStream};
pub use mixer::{MemberId, MixerHandle, MixerStream};
pub use mono::MonoStream;
pub use monitor::DataMonitorStream;
pub use properties::{AudioProperties, SampleFormat};
pub use resampling::ResamplingStream;
pub use sine::SineGeneratorStream;
pub use timewarp::TimeWarpStream;
pub use volume::VolumeClipStream;
pub use wav::WavFileStream;

use crate::error::{AudioError, Result};

/// Length reported by streams whose end is not known yet
pub const INFINITE_LENGTH: u64 = u64::MAX;

/// A byte-addressed audio stream.
///
/// `read` fills the front of `buffer` and returns the number of bytes written;
/// 0 means the end of the stream. A successful read advances `position` by
/// exactly the returned count. Buffer sizes should be multiples of
/// `sample_block_size`.
pub trait AudioStream: Send {
    /// Format of the bytes this stream produces
    fn properties(&self) -> AudioProperties;

    /// Total length in bytes, [`INFINITE_LENGTH`] if unknown
    fn length(&self) -> u64;

    /// Current byte position
    fn position(&self) -> u64;

    /// Moves the stream to a byte position
    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Reads the next bytes into `buffer`
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Bytes per sample block
    fn sample_block_size(&self) -> usize {
        self.properties().sample_block_byte_size()
    }

    /// The wrapped stream, `None` for sources
    fn source(&self) -> Option<&dyn AudioStream> {
        None
    }
}

impl<S: AudioStream + ?Sized> AudioStream for Box<S> {
    fn properties(&self) -> AudioProperties {
        (**self).properties()
    }

    fn length(&self) -> u64 {
        (**self).length()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        (**self).set_position(position)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read(buffer)
    }

    fn sample_block_size(&self) -> usize {
        (**self).sample_block_size()
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        (**self).source()
    }
}

/// Iterates a pipeline from `stream` down to its innermost source
pub fn chain<'a>(stream: &'a dyn AudioStream) -> impl Iterator<Item = &'a dyn AudioStream> + 'a {
    std::iter::successors(Some(stream), |s: &&'a dyn AudioStream| {
        let s: &'a dyn AudioStream = *s;
        s.source()
    })
}

/// Reads until `buffer` is full or the stream ends, returns the bytes read
pub fn read_fully<S: AudioStream + ?Sized>(stream: &mut S, buffer: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        let n = stream.read(&mut buffer[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Reads a finite stream from its current position to the end
pub fn read_to_end<S: AudioStream + ?Sized>(stream: &mut S, chunk_size: usize) -> Result<Vec<u8>> {
    let block = stream.sample_block_size();
    let chunk_size = (chunk_size / block).max(1) * block;
    let mut data = Vec::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    Ok(data)
}

/// Rounds `value` down to a multiple of `block`
#[inline]
pub(crate) fn align_down(value: u64, block: usize) -> u64 {
    value - value % block as u64
}

/// Fails with `MisalignedAccess` unless `value` is a multiple of `block`
pub(crate) fn check_aligned(value: u64, block: usize, what: &str) -> Result<()> {
    if value % block as u64 != 0 {
        return Err(AudioError::MisalignedAccess(format!(
            "{} {} is not a multiple of the sample block size {}",
            what, value, block
        )));
    }
    Ok(())
}
