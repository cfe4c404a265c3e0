//! Constant-value source

use crate::buffer::BlockIo;
use crate::node::{ProcessContext, Processor};

#[derive(Clone, Copy, Debug)]
pub enum ConstantMessage {
    SetValue(f32),
}

/// Writes the same value to every sample. Handy as a DC offset, a control
/// signal or a test tone.
pub struct Constant {
    value: f32,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Processor for Constant {
    type Message = ConstantMessage;

    fn perform(&mut self, _ctx: &ProcessContext, messages: impl Iterator<Item = ConstantMessage>, io: &mut BlockIo<'_>) {
        for msg in messages {
            match msg {
                ConstantMessage::SetValue(v) => self.value = v,
            }
        }
        io.fill(0, self.value);
    }
}
