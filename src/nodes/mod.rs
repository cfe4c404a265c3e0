//! Built-in audio nodes.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`Sine`] - Sine wave oscillator with frequency/amplitude control
//! - [`Constant`] - A fixed value on every sample
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`] - Volume control with smoothing, in-place capable
//! - [`Mixer`] - Sum several inlets with per-inlet levels
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio with no audio outputs:
//! - [`RtrbSink`] - Write to a ring buffer (device output, recording, analysis)
//!
//! # Message Types
//!
//! - [`SineMessage`] - Control [`Sine`] frequency and amplitude
//! - [`ConstantMessage`] - Change the [`Constant`] value
//! - [`GainMessage`] - Control [`Gain`] level
//! - [`MixerMessage`] - Control [`Mixer`] inlet levels
//!
//! [`RtrbSink`] has no parameters and uses `()` as its message type.

pub mod effect;
pub mod sink;
pub mod source;

pub use effect::{Gain, GainMessage, Mixer, MixerMessage};
pub use sink::RtrbSink;
pub use source::{Constant, ConstantMessage, Sine, SineMessage};
