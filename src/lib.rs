//! Real-time audio node chains that can be rewired while they play.
//!
//! A [`Chain`] owns [`Node`]s, each wrapping a [`Processor`]. Connections run
//! from a node's outlet to another node's inlet; several outlets feeding one
//! inlet are summed. Before it runs, a chain compiles its connections into an
//! execution order and wires every port to a pooled sample vector, letting
//! in-place nodes share vectors with their producers.
//!
//! Two paths touch a chain:
//! - the **real-time path** calls [`Chain::tick`] once per block (usually via
//!   [`SharedChain::try_tick`] from a [`DeviceManager`]'s clock). It never
//!   allocates and never waits.
//! - the **control path** edits structure. Edits happen between
//!   [`Chain::suspend`] and [`Chain::resume`], so the real-time path never
//!   sees a half-built topology.
//!
//! Parameters reach processors as messages through a lock-free queue, drained
//! at the start of every block.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dspchain::{Context, DeviceSettings, OfflineDevice};
//! use dspchain::nodes::{Gain, GainMessage, Sine};
//!
//! let device = Arc::new(OfflineDevice::new(DeviceSettings::new(48_000, 64)));
//! let context = Context::new(device.clone());
//! let chain = context.create_chain();
//!
//! let mut gain = {
//!     let mut c = chain.lock();
//!     let sine = c.add(Sine::new(440.0)).unwrap();
//!     let gain = c.add(Gain::new(0.5)).unwrap();
//!     c.connect(sine.id(), 0, gain.id(), 0).unwrap();
//!     c.start().unwrap();
//!     gain
//! };
//!
//! device.run(8);
//! gain.send(GainMessage::SetGain(0.25)).ok();
//! device.run(8);
//! ```

extern crate alloc;

pub mod buffer;
pub mod chain;
pub mod context;
pub mod device;
pub mod error;
pub mod node;
pub mod nodes;
pub mod port;
pub mod shared;

pub use buffer::{BlockIo, BufferId, Sample};
pub use chain::{Chain, ChainId};
pub use context::Context;
pub use device::{Clock, DeviceManager, DeviceSettings, OfflineDevice};
pub use error::{DspError, Result};
pub use node::{Handle, Node, NodeId, PrepareContext, ProcessContext, Processor, Sender, DEFAULT_QUEUE_SIZE};
pub use port::{Port, PortKind, PortRef};
pub use shared::{ChainGuard, SharedChain, SuspendGuard};

#[cfg(feature = "cpal_sink")]
pub use device::{CpalDevice, StreamHandle};
