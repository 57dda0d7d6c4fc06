//! Read notifications

use super::{AudioProperties, AudioStream};
use crate::error::Result;

/// Callback receiving the stream properties and the bytes of one read
pub type DataReadCallback = Box<dyn FnMut(&AudioProperties, &[u8]) + Send>;

/// Passes float audio through and hands every non-empty read to the
/// registered callbacks, e.g. for level meters.
pub struct DataMonitorStream<S> {
    source: S,
    callbacks: Vec<DataReadCallback>,
    disabled: bool,
}

impl<S: AudioStream> DataMonitorStream<S> {
    pub fn new(source: S) -> Result<Self> {
        source.properties().require_ieee_f32("DataMonitorStream")?;
        Ok(Self {
            source,
            callbacks: Vec::new(),
            disabled: false,
        })
    }

    pub fn on_data_read<F>(&mut self, callback: F)
    where
        F: FnMut(&AudioProperties, &[u8]) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: AudioStream> AudioStream for DataMonitorStream<S> {
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
        if !self.disabled && n > 0 {
            let properties = self.source.properties();
            for callback in self.callbacks.iter_mut() {
                callback(&properties, &buffer[..n]);
            }
        }
        Ok(n)
    }

    fn source(&self) -> Option<&dyn AudioStream> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{read_to_end, MemorySourceStream};
    use std::sync::mpsc;

    #[test]
    fn test_callbacks_see_every_read() {
        let source = MemorySourceStream::from_f32(&[0.0; 10], 1, 100).unwrap();
        let mut stream = DataMonitorStream::new(source).unwrap();
        let (tx, rx) = mpsc::channel();
        stream.on_data_read(move |_, data| {
            tx.send(data.len()).unwrap();
        });

        read_to_end(&mut stream, 16).unwrap();
        let sizes: Vec<usize> = rx.try_iter().collect();
        assert_eq!(sizes, vec![16, 16, 8]);
    }

    #[test]
    fn test_disabled_monitor_is_silent() {
        let source = MemorySourceStream::from_f32(&[0.0; 4], 1, 100).unwrap();
        let mut stream = DataMonitorStream::new(source).unwrap();
        let (tx, rx) = mpsc::channel::<usize>();
        stream.on_data_read(move |_, data| tx.send(data.len()).unwrap());
        stream.set_disabled(true);

        read_to_end(&mut stream, 16).unwrap();
        assert_eq!(rx.try_iter().count(), 0);
    }
}
