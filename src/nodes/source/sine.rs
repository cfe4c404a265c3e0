//! Sine wave oscillator

use crate::buffer::BlockIo;
use crate::node::{PrepareContext, ProcessContext, Processor};

/// Messages to control a Sine oscillator
#[derive(Clone, Copy, Debug)]
pub enum SineMessage {
    SetFrequency(f32),
    SetAmplitude(f32),
    /// Restart the waveform at phase 0
    ResetPhase,
}

/// A sine wave oscillator (mono source)
pub struct Sine {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency.max(0.0),
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    #[inline]
    pub fn phase(&self) -> f32 {
        self.phase
    }
}

impl Processor for Sine {
    type Message = SineMessage;

    fn prepare(&mut self, _ctx: &PrepareContext) {
        self.phase = 0.0;
    }

    fn perform(&mut self, ctx: &ProcessContext, messages: impl Iterator<Item = SineMessage>, io: &mut BlockIo<'_>) {
        for msg in messages {
            match msg {
                SineMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                SineMessage::SetAmplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
                SineMessage::ResetPhase => self.phase = 0.0,
            }
        }

        let phase_inc = (self.frequency / ctx.sample_rate as f32).fract();
        let amplitude = self.amplitude;

        for sample in io.output(0).iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * amplitude;

            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        0
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        1
    }
}
