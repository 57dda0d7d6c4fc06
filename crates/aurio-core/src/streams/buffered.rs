//! Read-ahead buffering with an optional background fill worker

use super::{check_aligned, read_fully, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

struct Buffer {
    data: Vec<u8>,
    /// Stream position of the first byte
    offset: u64,
    len: usize,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            offset: 0,
            len: 0,
        }
    }

    fn end(&self) -> u64 {
        self.offset + self.len as u64
    }

    fn contains(&self, position: u64) -> bool {
        position >= self.offset && position < self.end()
    }
}

enum BackBuffer {
    Idle(Buffer),
    /// Handed to the worker to fill `[start, end)`
    Filling { start: u64, end: u64 },
    Ready(Buffer),
}

struct FillRequest {
    buffer: Buffer,
    position: u64,
}

struct Worker {
    requests: Option<Sender<FillRequest>>,
    filled: Receiver<Buffer>,
    handle: Option<JoinHandle<()>>,
}

fn lock<S>(source: &Mutex<S>) -> MutexGuard<'_, S> {
    source.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fills `buffer` from `position`; only one fill runs against the source at a time
fn fill<S: AudioStream>(source: &Mutex<S>, buffer: &mut Buffer, position: u64) -> Result<u64> {
    let mut source = lock(source);
    buffer.offset = position;
    buffer.len = 0;
    if source.position() != position {
        source.set_position(position)?;
    }
    buffer.len = read_fully(&mut *source, &mut buffer.data)?;
    Ok(source.length())
}

fn fill_worker<S: AudioStream>(
    source: Arc<Mutex<S>>,
    requests: Receiver<FillRequest>,
    filled: Sender<Buffer>,
) {
    for FillRequest {
        mut buffer,
        position,
    } in requests
    {
        if let Err(e) = fill(&source, &mut buffer, position) {
            log::warn!("Background buffer fill at {} failed: {}", position, e);
            buffer.len = 0;
        }
        if filled.send(buffer).is_err() {
            break;
        }
    }
}

/// Serves reads from a buffer of the source.
///
/// The front buffer is filled synchronously on a miss. When double buffering
/// is enabled, a worker thread fills the back buffer with the data following
/// the front buffer, and the buffers are swapped once the reader gets there.
/// The worker hands filled buffers back over a channel, so the reader only
/// ever sees completed fills.
pub struct BufferedStream<S> {
    source: Arc<Mutex<S>>,
    properties: AudioProperties,
    length: u64,
    position: u64,
    buffer_size: usize,
    front: Buffer,
    back: Option<BackBuffer>,
    worker: Option<Worker>,
    swap_count: u64,
}

impl<S: AudioStream + 'static> BufferedStream<S> {
    pub fn new(source: S, buffer_size: usize, double_buffered: bool) -> Result<Self> {
        let properties = source.properties();
        let block = properties.sample_block_byte_size();
        let buffer_size = buffer_size / block * block;
        if buffer_size == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "buffer size must hold at least one sample block of {} bytes",
                block
            )));
        }
        let length = source.length();
        let position = source.position();
        let source = Arc::new(Mutex::new(source));

        let (back, worker) = if double_buffered {
            let (request_tx, request_rx) = mpsc::channel();
            let (filled_tx, filled_rx) = mpsc::channel();
            let worker_source = Arc::clone(&source);
            let handle = thread::Builder::new()
                .name("buffered-stream-fill".to_string())
                .spawn(move || fill_worker(worker_source, request_rx, filled_tx))?;
            (
                Some(BackBuffer::Idle(Buffer::new(buffer_size))),
                Some(Worker {
                    requests: Some(request_tx),
                    filled: filled_rx,
                    handle: Some(handle),
                }),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            source,
            properties,
            length,
            position,
            buffer_size,
            front: Buffer::new(buffer_size),
            back,
            worker,
            swap_count: 0,
        })
    }
}

impl<S: AudioStream> BufferedStream<S> {
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn double_buffered(&self) -> bool {
        self.back.is_some()
    }

    /// Number of front/back buffer swaps so far
    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }

    /// Range of the fill the worker is busy with
    fn in_flight(&self) -> Option<(u64, u64)> {
        match self.back {
            Some(BackBuffer::Filling { start, end }) => Some((start, end)),
            _ => None,
        }
    }

    fn receive_back(&mut self, blocking: bool) {
        let Some(worker) = self.worker.as_ref() else {
            return;
        };
        let received = if blocking {
            worker.filled.recv().map_err(|_| TryRecvError::Disconnected)
        } else {
            worker.filled.try_recv()
        };
        match received {
            Ok(buffer) => self.back = Some(BackBuffer::Ready(buffer)),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                log::warn!("Buffer fill worker stopped, continuing single buffered");
                self.back = None;
                self.worker = None;
            }
        }
    }

    /// Requests the data following the front buffer in the back buffer
    fn prefetch(&mut self) {
        let start = self.front.end();
        if start >= self.length {
            return;
        }
        let end = (start + self.buffer_size as u64).min(self.length);
        if let Some((s, e)) = self.in_flight() {
            if s == start && e == end {
                return;
            }
            // a stale fill has to come back before the buffer can be reused
            self.receive_back(true);
        }

        let buffer = match self.back.take() {
            Some(BackBuffer::Idle(buffer)) => buffer,
            Some(BackBuffer::Ready(buffer)) => {
                if buffer.contains(start) {
                    self.back = Some(BackBuffer::Ready(buffer));
                    return;
                }
                buffer
            }
            other => {
                self.back = other;
                return;
            }
        };
        let Some(requests) = self.worker.as_ref().and_then(|w| w.requests.as_ref()) else {
            self.back = Some(BackBuffer::Idle(buffer));
            return;
        };
        match requests.send(FillRequest {
            buffer,
            position: start,
        }) {
            Ok(()) => self.back = Some(BackBuffer::Filling { start, end }),
            Err(mpsc::SendError(request)) => {
                log::warn!("Buffer fill worker stopped, continuing single buffered");
                drop(request);
                self.back = None;
                self.worker = None;
            }
        }
    }

    /// Swaps in the back buffer if it holds `position`, waiting for an in-flight fill that will
    fn try_swap(&mut self, position: u64) -> bool {
        if let Some((start, end)) = self.in_flight() {
            self.receive_back(position >= start && position < end);
        }
        match self.back.take() {
            Some(BackBuffer::Ready(buffer)) if buffer.contains(position) => {
                let old = std::mem::replace(&mut self.front, buffer);
                self.back = Some(BackBuffer::Idle(old));
                self.swap_count += 1;
                log::debug!(
                    "BufferedStream swap #{}: front now [{}, {})",
                    self.swap_count,
                    self.front.offset,
                    self.front.end()
                );
                true
            }
            other => {
                self.back = other;
                false
            }
        }
    }
}

impl<S: AudioStream> AudioStream for BufferedStream<S> {
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
        check_aligned(position, self.sample_block_size(), "position")?;
        if position > self.length {
            return Err(AudioError::InvalidRange(format!(
                "position {} beyond length {}",
                position, self.length
            )));
        }
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(buffer.len() as u64, self.sample_block_size(), "read count")?;
        let count = buffer.len();
        if count == 0 || self.position >= self.length {
            return Ok(0);
        }

        if !self.front.contains(self.position) {
            if self.try_swap(self.position) {
                self.prefetch();
            } else {
                self.length = fill(&self.source, &mut self.front, self.position)?;
                if self.front.len == 0 {
                    return Ok(0);
                }
                self.prefetch();
            }
        }

        let offset = (self.position - self.front.offset) as usize;
        let n = (self.front.len - offset).min(count);
        buffer[..n].copy_from_slice(&self.front.data[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<S> Drop for BufferedStream<S> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            // closing the request channel ends the worker loop
            worker.requests.take();
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::warn!("Buffer fill worker panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{read_to_end, MemorySourceStream, SampleFormat};

    fn source(bytes: usize) -> MemorySourceStream {
        let samples: Vec<f32> = (0..bytes / 4).map(|i| i as f32).collect();
        MemorySourceStream::from_f32(&samples, 1, 44100).unwrap()
    }

    /// 8-bit mono, so any read count is block aligned
    fn byte_source(bytes: usize) -> MemorySourceStream {
        let data: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
        let properties = AudioProperties::new(1, 8000, 8, SampleFormat::Lpcm).unwrap();
        MemorySourceStream::new(data, properties).unwrap()
    }

    #[test]
    fn test_double_buffered_sequential_read() {
        let expected = byte_source(20000).data().to_vec();
        let mut stream = BufferedStream::new(byte_source(20000), 4096, true).unwrap();

        let mut out = Vec::new();
        let mut buffer = [0u8; 777];
        loop {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(out, expected);
        assert_eq!(stream.position(), stream.length());
        assert!(stream.swap_count() >= 1);
    }

    #[test]
    fn test_single_buffered_never_swaps() {
        let expected = source(10000).data().to_vec();
        let mut stream = BufferedStream::new(source(10000), 1000, false).unwrap();
        let data = read_to_end(&mut stream, 300).unwrap();
        assert_eq!(data, expected);
        assert_eq!(stream.swap_count(), 0);
        assert!(!stream.double_buffered());
    }

    #[test]
    fn test_seeks_outside_buffers() {
        let expected = source(20000).data().to_vec();
        let mut stream = BufferedStream::new(source(20000), 4096, true).unwrap();
        let mut buffer = [0u8; 400];

        for &position in &[16000u64, 0, 8192, 12000, 4000] {
            stream.set_position(position).unwrap();
            let n = stream.read(&mut buffer).unwrap();
            assert!(n > 0);
            let start = position as usize;
            assert_eq!(&buffer[..n], &expected[start..start + n]);
            assert_eq!(stream.position(), position + n as u64);
        }

        assert!(stream.set_position(20004).is_err());
        assert!(stream.set_position(2).is_err());
        stream.set_position(20000).unwrap();
        assert_eq!(stream.read(&mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_buffer_size_is_block_aligned() {
        let stream = BufferedStream::new(source(100), 1001, true).unwrap();
        assert_eq!(stream.buffer_size(), 1000);
        assert!(BufferedStream::new(source(100), 3, false).is_err());
    }

    #[test]
    fn test_misaligned_read_is_rejected() {
        let mut stream = BufferedStream::new(source(100), 40, true).unwrap();
        let mut buffer = [0u8; 6];
        assert!(matches!(
            stream.read(&mut buffer),
            Err(AudioError::MisalignedAccess(_))
        ));
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.read(&mut buffer[..4]).unwrap(), 4);
    }
}
