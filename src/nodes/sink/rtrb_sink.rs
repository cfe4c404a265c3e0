//! Ring buffer sink for custom audio processing

use rtrb::Producer;

use crate::buffer::BlockIo;
use crate::node::{ProcessContext, Processor};

/// A sink that pushes audio into an rtrb ring buffer
///
/// Useful for:
/// - Feeding an audio device from another thread
/// - Recording/analysis
///
/// The single inlet is interleaved onto `channels` channels. A block that
/// does not fit is dropped whole rather than written partially.
pub struct RtrbSink {
    producer: Producer<f32>,
    channels: usize,
    dropped_blocks: u64,
}

impl RtrbSink {
    /// Create a sink that writes interleaved samples to the given producer
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            dropped_blocks: 0,
        }
    }

    /// Create a sink for mono audio
    pub fn mono(producer: Producer<f32>) -> Self {
        Self::new(producer, 1)
    }

    /// Create a sink for stereo audio
    pub fn stereo(producer: Producer<f32>) -> Self {
        Self::new(producer, 2)
    }

    /// Returns how many sample slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Blocks skipped because the ring buffer was full
    #[inline]
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }
}

impl Processor for RtrbSink {
    type Message = (); // No control messages

    fn perform(&mut self, _ctx: &ProcessContext, _messages: impl Iterator<Item = ()>, io: &mut BlockIo<'_>) {
        let input = io.input(0);
        if input.is_empty() {
            return;
        }

        // Skip if buffer is full
        if self.producer.slots() < input.len() * self.channels {
            self.dropped_blocks += 1;
            return;
        }

        for &sample in input {
            for _ in 0..self.channels {
                let _ = self.producer.push(sample);
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::device::DeviceSettings;
    use crate::nodes::Constant;
    use rtrb::RingBuffer;

    #[test]
    fn interleaves_and_drops_whole_blocks() {
        let (producer, mut consumer) = RingBuffer::new(12);
        let mut chain = Chain::new(DeviceSettings::new(48_000, 4));
        let source = chain.add(Constant::new(0.5)).unwrap();
        let sink = chain.add(RtrbSink::stereo(producer)).unwrap();
        chain.connect(source.id(), 0, sink.id(), 0).unwrap();
        chain.start().unwrap();

        chain.tick();
        chain.tick();
        assert_eq!(consumer.slots(), 8);

        let node = chain.node(sink.id()).unwrap();
        assert_eq!(node.processor::<RtrbSink>().unwrap().dropped_blocks(), 1);
        assert_eq!(consumer.pop().ok(), Some(0.5));
    }
}
