//! Blocking fixed-capacity FIFO for push/pull decoupling
//!
//! A writer thread pushes audio through a [`FifoWriter`] while the reader
//! consumes the [`BlockingFixedLengthFifoStream`] like any other stream.
//! Reads block until data arrives or the end of input is signalled. The writer
//! never blocks: when it outruns the reader, the oldest unread bytes are
//! overwritten and counted as lost.

use super::{check_aligned, AudioProperties, AudioStream, INFINITE_LENGTH};
use crate::error::{AudioError, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct FifoState {
    buffer: Vec<u8>,
    /// Total bytes written, the absolute write cursor
    write_position: u64,
    /// Absolute read cursor, never behind `write_position - capacity`
    read_position: u64,
    end_of_input: bool,
    lost_bytes: u64,
}

impl FifoState {
    fn capacity(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn store(&mut self, data: &[u8]) {
        let capacity = self.buffer.len();
        let start = (self.write_position % capacity as u64) as usize;
        let before_wrap = data.len().min(capacity - start);
        self.buffer[start..start + before_wrap].copy_from_slice(&data[..before_wrap]);
        let after_wrap = data.len() - before_wrap;
        self.buffer[..after_wrap].copy_from_slice(&data[before_wrap..]);
        self.write_position += data.len() as u64;
    }

    fn load(&mut self, out: &mut [u8]) {
        let capacity = self.buffer.len();
        let start = (self.read_position % capacity as u64) as usize;
        let before_wrap = out.len().min(capacity - start);
        out[..before_wrap].copy_from_slice(&self.buffer[start..start + before_wrap]);
        let after_wrap = out.len() - before_wrap;
        out[before_wrap..].copy_from_slice(&self.buffer[..after_wrap]);
        self.read_position += out.len() as u64;
    }
}

struct FifoShared {
    properties: AudioProperties,
    state: Mutex<FifoState>,
    data_available: Condvar,
}

impl FifoShared {
    fn lock(&self) -> MutexGuard<'_, FifoState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reading end of the FIFO.
///
/// `length` is [`INFINITE_LENGTH`] until the end of input has been signalled and
/// the total number of written bytes afterwards, so `position == length` only
/// marks the end once the stream is known to be finite.
pub struct BlockingFixedLengthFifoStream {
    shared: Arc<FifoShared>,
}

/// Writing end of the FIFO
#[derive(Clone)]
pub struct FifoWriter {
    shared: Arc<FifoShared>,
}

impl BlockingFixedLengthFifoStream {
    pub fn new(properties: AudioProperties, capacity: usize) -> Result<Self> {
        let block = properties.sample_block_byte_size();
        if capacity == 0 {
            return Err(AudioError::InvalidConfiguration(
                "FIFO capacity must be > 0".to_string(),
            ));
        }
        check_aligned(capacity as u64, block, "FIFO capacity")?;
        Ok(Self {
            shared: Arc::new(FifoShared {
                properties,
                state: Mutex::new(FifoState {
                    buffer: vec![0u8; capacity],
                    write_position: 0,
                    read_position: 0,
                    end_of_input: false,
                    lost_bytes: 0,
                }),
                data_available: Condvar::new(),
            }),
        })
    }

    pub fn writer(&self) -> FifoWriter {
        FifoWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn write_position(&self) -> u64 {
        self.shared.lock().write_position
    }

    /// Buffered bytes not consumed yet
    pub fn read_delay(&self) -> u64 {
        let state = self.shared.lock();
        state.write_position - state.read_position
    }

    /// Unread bytes overwritten because the writer outran the reader
    pub fn lost_bytes(&self) -> u64 {
        self.shared.lock().lost_bytes
    }

    pub fn end_of_input_signalled(&self) -> bool {
        self.shared.lock().end_of_input
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.writer().write(data)
    }

    pub fn signal_end_of_input(&self) {
        self.writer().signal_end_of_input()
    }
}

impl FifoWriter {
    /// Appends block-aligned data, dropping the oldest unread bytes on overflow
    pub fn write(&self, data: &[u8]) -> Result<()> {
        check_aligned(
            data.len() as u64,
            self.shared.properties.sample_block_byte_size(),
            "write count",
        )?;

        let mut state = self.shared.lock();
        if state.end_of_input {
            return Err(AudioError::InvalidConfiguration(
                "end of input has been signalled, no more data can be written".to_string(),
            ));
        }

        let capacity = state.capacity();
        let mut data = data;
        if data.len() as u64 > capacity {
            // Bytes that would be overwritten by the same write are skipped
            let overflow = data.len() - capacity as usize;
            state.write_position += overflow as u64;
            data = &data[overflow..];
        }
        state.store(data);

        let oldest = state.write_position.saturating_sub(capacity);
        if state.read_position < oldest {
            let lost = oldest - state.read_position;
            state.lost_bytes += lost;
            state.read_position = oldest;
            log::warn!("FIFO overflow: lost {} unread bytes", lost);
        }

        drop(state);
        self.shared.data_available.notify_all();
        Ok(())
    }

    /// No more data will follow; blocked and future reads drain the buffer and end
    pub fn signal_end_of_input(&self) {
        self.shared.lock().end_of_input = true;
        self.shared.data_available.notify_all();
    }
}

impl AudioStream for BlockingFixedLengthFifoStream {
    fn properties(&self) -> AudioProperties {
        self.shared.properties
    }

    fn length(&self) -> u64 {
        let state = self.shared.lock();
        if state.end_of_input {
            state.write_position
        } else {
            INFINITE_LENGTH
        }
    }

    fn position(&self) -> u64 {
        self.shared.lock().read_position
    }

    fn set_position(&mut self, _position: u64) -> Result<()> {
        Err(AudioError::NotSeekable(
            "the FIFO read position cannot be set".to_string(),
        ))
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(
            buffer.len() as u64,
            self.shared.properties.sample_block_byte_size(),
            "read count",
        )?;
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        while state.write_position == state.read_position {
            if state.end_of_input {
                return Ok(0);
            }
            state = self
                .shared
                .data_available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        let available = (state.write_position - state.read_position) as usize;
        let count = available.min(buffer.len());
        state.load(&mut buffer[..count]);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn fifo(capacity: usize) -> BlockingFixedLengthFifoStream {
        BlockingFixedLengthFifoStream::new(AudioProperties::ieee(1, 1000).unwrap(), capacity)
            .unwrap()
    }

    #[test]
    fn test_read_blocks_until_write() {
        let mut stream = fifo(1024);
        let writer = stream.writer();
        let (tx, rx) = mpsc::channel();

        let reader = thread::spawn(move || {
            let mut buffer = [0u8; 64];
            let n = stream.read(&mut buffer).unwrap();
            tx.send(n).unwrap();
            (stream, buffer)
        });

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "read returned before data was written");

        writer.write(&[7u8; 32]).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 32);
        let (stream, buffer) = reader.join().unwrap();
        assert_eq!(&buffer[..32], &[7u8; 32]);
        assert_eq!(stream.position(), 32);
    }

    #[test]
    fn test_read_unblocks_on_end_of_input() {
        let mut stream = fifo(1024);
        let writer = stream.writer();

        let reader = thread::spawn(move || {
            let mut buffer = [0u8; 64];
            stream.read(&mut buffer).unwrap()
        });

        thread::sleep(Duration::from_millis(50));
        writer.signal_end_of_input();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_length_is_infinite_until_end_of_input() {
        let stream = fifo(64);
        stream.write(&[1u8; 16]).unwrap();
        assert_eq!(stream.length(), INFINITE_LENGTH);
        stream.signal_end_of_input();
        assert_eq!(stream.length(), 16);
        assert!(stream.write(&[1u8; 4]).is_err());
    }

    #[test]
    fn test_overflow_drops_oldest_unread() {
        let mut stream = fifo(1024);
        let writer = stream.writer();
        let data: Vec<u8> = (0..2048u32).map(|i| (i / 8) as u8).collect();

        let producer = thread::spawn(move || {
            writer.write(&data).unwrap();
            writer.signal_end_of_input();
        });
        producer.join().unwrap();

        let mut total = 0;
        let mut first = None;
        let mut buffer = [0u8; 100];
        loop {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            first.get_or_insert(buffer[0]);
            total += n;
        }
        assert_eq!(total, 1024);
        assert_eq!(stream.lost_bytes(), 1024);
        // Reading resumes with the first byte that was not overwritten
        assert_eq!(first, Some(128));
        assert_eq!(stream.position(), stream.length());
    }

    #[test]
    fn test_sub_block_read_is_not_end_of_stream() {
        let properties = AudioProperties::ieee(2, 1000).unwrap();
        let mut stream = BlockingFixedLengthFifoStream::new(properties, 64).unwrap();
        stream.write(&[3u8; 16]).unwrap();

        let mut buffer = [0u8; 8];
        assert!(matches!(
            stream.read(&mut buffer[..4]),
            Err(AudioError::MisalignedAccess(_))
        ));
        assert!(!stream.end_of_input_signalled());
        assert_eq!(stream.read(&mut buffer).unwrap(), 8);
        assert_eq!(stream.read(&mut buffer).unwrap(), 8);
        assert_eq!(stream.position(), 16);
    }

    #[test]
    fn test_wrapping_writes_preserve_order() {
        let mut stream = fifo(16);
        let mut out = Vec::new();
        let mut buffer = [0u8; 12];
        for round in 0..5u8 {
            stream.write(&[round; 12]).unwrap();
            let n = stream.read(&mut buffer).unwrap();
            out.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(out.len(), 60);
        assert!(out.chunks(12).enumerate().all(|(i, c)| c.iter().all(|&b| b == i as u8)));
        assert_eq!(stream.lost_bytes(), 0);
        assert!(matches!(
            stream.set_position(0),
            Err(AudioError::NotSeekable(_))
        ));
    }
}
