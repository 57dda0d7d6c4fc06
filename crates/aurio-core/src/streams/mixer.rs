//! Additive mixing of several streams

use super::samples::mix_f32;
use super::{align_down, check_aligned, read_fully, AudioProperties, AudioStream};
use crate::error::{AudioError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifies a stream added to a mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(u64);

struct MixerState {
    members: Vec<(MemberId, Box<dyn AudioStream>)>,
    length: u64,
    position: u64,
    next_id: u64,
}

impl MixerState {
    fn update_length(&mut self) {
        self.length = self
            .members
            .iter()
            .map(|(_, s)| s.length())
            .max()
            .unwrap_or(0);
    }
}

fn lock_state(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sums any number of float streams that share one position.
///
/// Membership changes and reads are serialized by a single lock, so members can be
/// added or removed through a [`MixerHandle`] while another thread reads.
pub struct MixerStream {
    properties: AudioProperties,
    state: Arc<Mutex<MixerState>>,
    scratch: Vec<u8>,
}

/// Cloneable handle for changing the members of a [`MixerStream`]
#[derive(Clone)]
pub struct MixerHandle {
    properties: AudioProperties,
    state: Arc<Mutex<MixerState>>,
}

impl MixerStream {
    pub fn new(channels: usize, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            properties: AudioProperties::ieee(channels, sample_rate)?,
            state: Arc::new(Mutex::new(MixerState {
                members: Vec::new(),
                length: 0,
                position: 0,
                next_id: 0,
            })),
            scratch: Vec::new(),
        })
    }

    pub fn handle(&self) -> MixerHandle {
        MixerHandle {
            properties: self.properties,
            state: Arc::clone(&self.state),
        }
    }

    pub fn add(&self, stream: Box<dyn AudioStream>) -> Result<MemberId> {
        self.handle().add(stream)
    }

    pub fn remove(&self, id: MemberId) -> Option<Box<dyn AudioStream>> {
        self.handle().remove(id)
    }

    pub fn clear(&self) {
        self.handle().clear()
    }

    pub fn member_count(&self) -> usize {
        lock_state(&self.state).members.len()
    }
}

impl MixerHandle {
    /// Adds a stream at the current mixer position
    pub fn add(&self, mut stream: Box<dyn AudioStream>) -> Result<MemberId> {
        let props = stream.properties();
        if !props.is_ieee_f32()
            || props.channels() != self.properties.channels()
            || props.sample_rate() != self.properties.sample_rate()
        {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot mix {} into {}",
                props, self.properties
            )));
        }

        let mut state = lock_state(&self.state);
        let position = align_down(
            state.position.min(stream.length()),
            self.properties.sample_block_byte_size(),
        );
        stream.set_position(position)?;

        let id = MemberId(state.next_id);
        state.next_id += 1;
        state.members.push((id, stream));
        state.update_length();
        log::debug!("Mixer: added member {:?}, length {}", id, state.length);
        Ok(id)
    }

    pub fn remove(&self, id: MemberId) -> Option<Box<dyn AudioStream>> {
        let mut state = lock_state(&self.state);
        let index = state.members.iter().position(|(member, _)| *member == id)?;
        let (_, stream) = state.members.remove(index);
        state.update_length();
        Some(stream)
    }

    pub fn clear(&self) {
        let mut state = lock_state(&self.state);
        state.members.clear();
        state.update_length();
    }
}

impl AudioStream for MixerStream {
    fn properties(&self) -> AudioProperties {
        self.properties
    }

    fn length(&self) -> u64 {
        lock_state(&self.state).length
    }

    fn position(&self) -> u64 {
        lock_state(&self.state).position
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        check_aligned(position, self.sample_block_size(), "position")?;
        let mut state = lock_state(&self.state);
        state.position = position;
        for (_, member) in state.members.iter_mut() {
            let target = position.min(member.length());
            member.set_position(target)?;
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        check_aligned(
            buffer.len() as u64,
            self.properties.sample_block_byte_size(),
            "read count",
        )?;
        let mut state = lock_state(&self.state);
        if state.position >= state.length {
            return Ok(0);
        }

        let count = buffer.len();
        if self.scratch.len() < count {
            self.scratch.resize(count, 0);
        }
        buffer[..count].fill(0);

        let position = state.position;
        let mut total = 0;
        for (_, member) in state.members.iter_mut() {
            if member.length() <= position {
                continue;
            }
            let n = read_fully(member, &mut self.scratch[..count])?;
            mix_f32(&mut buffer[..n], &self.scratch[..n]);
            total = total.max(n);
        }
        state.position += total as u64;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::samples::f32_at;
    use crate::streams::{read_to_end, MemorySourceStream};
    use approx::assert_relative_eq;

    fn source(samples: &[f32]) -> Box<dyn AudioStream> {
        Box::new(MemorySourceStream::from_f32(samples, 1, 100).unwrap())
    }

    #[test]
    fn test_mixer_adds_members() {
        let mut mixer = MixerStream::new(1, 100).unwrap();
        mixer.add(source(&[0.1, 0.2, 0.3, 0.4])).unwrap();
        mixer.add(source(&[0.5, 0.5])).unwrap();
        assert_eq!(mixer.length(), 16);

        let data = read_to_end(&mut mixer, 64).unwrap();
        assert_eq!(data.len(), 16);
        assert_relative_eq!(f32_at(&data, 0), 0.6);
        assert_relative_eq!(f32_at(&data, 1), 0.7);
        assert_relative_eq!(f32_at(&data, 2), 0.3);
        assert_relative_eq!(f32_at(&data, 3), 0.4);
        assert_eq!(mixer.position(), 16);
    }

    #[test]
    fn test_length_follows_membership() {
        let mixer = MixerStream::new(1, 100).unwrap();
        let long = mixer.add(source(&[0.0; 10])).unwrap();
        mixer.add(source(&[0.0; 4])).unwrap();
        assert_eq!(mixer.length(), 40);

        assert!(mixer.remove(long).is_some());
        assert_eq!(mixer.length(), 16);
        assert!(mixer.remove(long).is_none());

        mixer.clear();
        assert_eq!(mixer.length(), 0);
        assert_eq!(mixer.member_count(), 0);
    }

    #[test]
    fn test_position_propagates_to_members() {
        let mut mixer = MixerStream::new(1, 100).unwrap();
        mixer.add(source(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        mixer.add(source(&[10.0, 20.0])).unwrap();
        mixer.set_position(8).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(mixer.read(&mut buffer).unwrap(), 8);
        assert_relative_eq!(f32_at(&buffer, 0), 3.0);
        assert_relative_eq!(f32_at(&buffer, 1), 4.0);
    }

    #[test]
    fn test_rejects_mismatching_format() {
        let mixer = MixerStream::new(2, 100).unwrap();
        assert!(matches!(
            mixer.add(source(&[0.0; 2])),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_handle_adds_from_other_thread() {
        let mut mixer = MixerStream::new(1, 100).unwrap();
        let handle = mixer.handle();
        std::thread::spawn(move || {
            handle.add(source(&[0.25; 8])).unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(mixer.length(), 32);
        let data = read_to_end(&mut mixer, 12).unwrap();
        assert_eq!(data.len(), 32);
        assert_relative_eq!(f32_at(&data, 7), 0.25);
    }
}
