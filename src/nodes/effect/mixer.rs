//! Mixer effect - sums multiple inlets together

use alloc::vec;
use alloc::vec::Vec;

use crate::buffer::BlockIo;
use crate::node::{PrepareContext, ProcessContext, Processor};

#[derive(Clone, Copy, Debug)]
pub enum MixerMessage {
    /// Set the level of one inlet (1.0 = unity)
    SetLevel(usize, f32),
}

/// A mixer that sums its inlets into a single outlet
///
/// Each inlet has its own level, unity by default. Levels follow inlet count
/// changes made through
/// [`Chain::set_input_port_count`](crate::Chain::set_input_port_count); new
/// inlets start at unity.
pub struct Mixer {
    levels: Vec<f32>,
}

impl Mixer {
    /// Create a mixer with `inputs` inlets
    pub fn new(inputs: usize) -> Self {
        Self {
            levels: vec![1.0; inputs],
        }
    }

    pub fn with_levels(levels: impl IntoIterator<Item = f32>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
        }
    }

    pub fn level(&self, inlet: usize) -> f32 {
        self.levels.get(inlet).copied().unwrap_or(1.0)
    }
}

impl Processor for Mixer {
    type Message = MixerMessage;

    fn prepare(&mut self, ctx: &PrepareContext) {
        self.levels.resize(ctx.num_inputs, 1.0);
    }

    fn perform(&mut self, _ctx: &ProcessContext, messages: impl Iterator<Item = MixerMessage>, io: &mut BlockIo<'_>) {
        for msg in messages {
            match msg {
                MixerMessage::SetLevel(inlet, level) => {
                    if let Some(l) = self.levels.get_mut(inlet) {
                        *l = level;
                    }
                }
            }
        }

        if io.num_inputs() == 0 {
            io.silence();
            return;
        }

        let first = self.level(0);
        io.process(0, 0, |x| x * first);
        for inlet in 1..io.num_inputs() {
            io.mix(inlet, 0, self.level(inlet));
        }
    }

    fn num_inputs(&self) -> usize {
        self.levels.len()
    }

    fn num_outputs(&self) -> usize {
        1
    }
}
