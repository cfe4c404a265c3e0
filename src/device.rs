//! Device settings, the device manager seam and its implementations.
//!
//! A [`DeviceManager`] owns the clock that drives chains. [`OfflineDevice`]
//! is ticked by hand (tests, offline rendering); [`CpalDevice`] is ticked by
//! an audio stream and needs the `cpal_sink` feature.
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! # #[cfg(feature = "cpal_sink")] {
//! use std::sync::Arc;
//! use dspchain::{Context, CpalDevice, DeviceManager};
//!
//! for (i, device) in CpalDevice::list_outputs().iter().enumerate() {
//!     println!("[{}] {} ({} Hz, {} ch)",
//!         i, device.name(), device.sample_rate(), device.channels());
//! }
//!
//! let device = Arc::new(CpalDevice::default_output().unwrap());
//! let context = Context::new(device);
//! # }
//! ```

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{DspError, Result};
use crate::shared::SharedChain;

/// Sample rate and block size a chain runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Hz
    pub sample_rate: u32,
    /// Samples per block and per vector
    pub block_size: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 64,
        }
    }
}

impl DeviceSettings {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self { sample_rate, block_size }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Rejects a zero sample rate or block size.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(DspError::InvalidSettings {
                reason: "sample rate must be positive".into(),
            });
        }
        if self.block_size == 0 {
            return Err(DspError::InvalidSettings {
                reason: format!("block size must be positive (sample rate {})", self.sample_rate),
            });
        }
        Ok(())
    }
}

/// The external clock and audio device chains run against.
pub trait DeviceManager: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> DeviceSettings;

    fn sample_rate(&self) -> u32 {
        self.settings().sample_rate
    }

    fn block_size(&self) -> usize {
        self.settings().block_size
    }

    /// Start ticking `chain` once per block. Attaching twice is a no-op.
    fn attach(&self, chain: SharedChain);

    /// Stop ticking `chain`. Returns whether it was attached.
    fn detach(&self, chain: &SharedChain) -> bool;
}

/// The tick callback slot: a list of chains ticked once per block.
///
/// Hardware devices drive it with [`advance`](Self::advance), which ticks at
/// block cadence whatever size their callbacks have.
#[derive(Default)]
pub struct Clock {
    chains: Mutex<Vec<SharedChain>>,
    blocks: AtomicU64,
    /// Frames rendered by earlier ticks and not yet consumed.
    ahead: AtomicUsize,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, chain: SharedChain) {
        let mut chains = self.chains.lock();
        if !chains.iter().any(|c| c.ptr_eq(&chain)) {
            tracing::debug!(chain = %chain.id(), "chain attached to clock");
            chains.push(chain);
        }
    }

    pub fn detach(&self, chain: &SharedChain) -> bool {
        let mut chains = self.chains.lock();
        let before = chains.len();
        chains.retain(|c| !c.ptr_eq(chain));
        before != chains.len()
    }

    pub fn len(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real-time path: tick every attached chain that is not held by the
    /// control path. Returns how many chains processed a block.
    pub fn tick(&self) -> usize {
        let chains = match self.chains.try_lock() {
            Some(chains) => chains,
            None => return 0,
        };
        let ticked = chains.iter().filter(|c| c.try_tick()).count();
        self.blocks.fetch_add(1, Ordering::Relaxed);
        ticked
    }

    /// Real-time path: account for `frames` frames about to be consumed and
    /// tick once for every block needed to cover them. Over time this ticks
    /// exactly once per `block_size` frames and never renders more than one
    /// block ahead. Returns the number of clock ticks.
    pub fn advance(&self, frames: usize, block_size: usize) -> usize {
        if block_size == 0 {
            return 0;
        }
        let ahead = self.ahead.load(Ordering::Relaxed);
        if ahead >= frames {
            self.ahead.store(ahead - frames, Ordering::Relaxed);
            return 0;
        }
        let blocks = (frames - ahead).div_ceil(block_size);
        self.ahead.store(ahead + blocks * block_size - frames, Ordering::Relaxed);
        for _ in 0..blocks {
            self.tick();
        }
        blocks
    }

    /// Number of clock ticks so far.
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

/// A device without hardware, clocked by calling [`tick`](Self::tick).
pub struct OfflineDevice {
    name: String,
    settings: DeviceSettings,
    clock: Clock,
}

impl OfflineDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            name: "offline".into(),
            settings,
            clock: Clock::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Advance one block. Returns how many chains processed it.
    pub fn tick(&self) -> usize {
        self.clock.tick()
    }

    /// Advance `blocks` blocks. Returns the total number of chain ticks.
    pub fn run(&self, blocks: usize) -> usize {
        (0..blocks).map(|_| self.clock.tick()).sum()
    }

    /// Consume `frames` frames as a hardware callback would, ticking at
    /// block cadence. Returns the number of clock ticks.
    pub fn render(&self, frames: usize) -> usize {
        self.clock.advance(frames, self.settings.block_size)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl Default for OfflineDevice {
    fn default() -> Self {
        Self::new(DeviceSettings::default())
    }
}

impl DeviceManager for OfflineDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> DeviceSettings {
        self.settings
    }

    fn attach(&self, chain: SharedChain) {
        self.clock.attach(chain);
    }

    fn detach(&self, chain: &SharedChain) -> bool {
        self.clock.detach(chain)
    }
}

#[cfg(feature = "cpal_sink")]
pub use self::cpal_device::{CpalDevice, StreamHandle};

#[cfg(feature = "cpal_sink")]
mod cpal_device {
    use alloc::format;
    use alloc::string::String;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{FromSample, Sample, SampleFormat, SizedSample};
    use rtrb::{Consumer, RingBuffer};

    use super::{Clock, DeviceManager, DeviceSettings};
    use crate::error::{DspError, Result};
    use crate::nodes::RtrbSink;
    use crate::shared::SharedChain;

    /// A discovered audio output device.
    ///
    /// Use [`CpalDevice::default_output`] to get the system default, or
    /// [`CpalDevice::list_outputs`] to enumerate all available devices. The
    /// stream started by [`play`](Self::play) ticks every attached chain once
    /// per block of frames it hands to the hardware.
    pub struct CpalDevice {
        device: cpal::Device,
        config: cpal::SupportedStreamConfig,

        name: String,
        settings: DeviceSettings,
        channels: u16,
        clock: Arc<Clock>,
    }

    impl CpalDevice {
        fn from_device(device: cpal::Device) -> Option<Self> {
            let config = device.default_output_config().ok()?;
            let name = device.name().unwrap_or_else(|_| "Unknown".into());
            Some(Self {
                settings: DeviceSettings::default().with_sample_rate(config.sample_rate().0),
                channels: config.channels(),
                name,
                device,
                config,
                clock: Arc::new(Clock::new()),
            })
        }

        /// Get the system's default output device.
        ///
        /// Returns `None` if no audio device is available.
        pub fn default_output() -> Option<Self> {
            let host = cpal::default_host();
            Self::from_device(host.default_output_device()?)
        }

        /// List all available audio output devices.
        ///
        /// Returns an empty list if no devices are found or if enumeration fails.
        pub fn list_outputs() -> Vec<Self> {
            let host = cpal::default_host();
            host.output_devices()
                .map(|devices| devices.filter_map(Self::from_device).collect())
                .unwrap_or_default()
        }

        /// Samples per block for chains run by this device.
        pub fn with_block_size(mut self, block_size: usize) -> Self {
            self.settings.block_size = block_size;
            self
        }

        pub fn channels(&self) -> u16 {
            self.channels
        }

        pub fn clock(&self) -> &Arc<Clock> {
            &self.clock
        }

        /// A ring buffer sized for ~100ms of audio: the sink half goes at the
        /// end of a chain, the consumer half to [`play`](Self::play).
        pub fn create_sink(&self) -> (RtrbSink, Consumer<f32>) {
            let channels = self.channels as usize;
            let samples = (self.settings.sample_rate as usize / 10) * channels;
            let (producer, consumer) = RingBuffer::new(samples.next_power_of_two().max(8192));
            (RtrbSink::new(producer, channels), consumer)
        }

        /// Open the output stream on its own thread.
        ///
        /// The stream lives until the returned handle is dropped.
        pub fn play(&self, consumer: Consumer<f32>) -> Result<StreamHandle> {
            let device = self.device.clone();
            let sample_format = self.config.sample_format();
            let config = self.config.config();
            let clock = Arc::clone(&self.clock);
            let block_size = self.settings.block_size;
            let underrun = Arc::new(AtomicBool::new(false));
            let stop = Arc::new(AtomicBool::new(false));

            let (ready_tx, ready_rx) = mpsc::sync_channel(1);
            let thread = {
                let underrun = Arc::clone(&underrun);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let stream = match open_stream(&device, sample_format, &config, consumer, clock, block_size, underrun) {
                        Ok(stream) => stream,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    while !stop.load(Ordering::Acquire) {
                        thread::park_timeout(Duration::from_millis(100));
                    }
                    drop(stream);
                })
            };

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    tracing::debug!(device = %self.name, ?sample_format, "output stream playing");
                    Ok(StreamHandle {
                        thread: Some(thread),
                        stop,
                        underrun,
                    })
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Err(DspError::DeviceFailure {
                    reason: "stream thread exited before opening the stream".into(),
                }),
            }
        }
    }

    impl DeviceManager for CpalDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn settings(&self) -> DeviceSettings {
            self.settings
        }

        fn attach(&self, chain: SharedChain) {
            self.clock.attach(chain);
        }

        fn detach(&self, chain: &SharedChain) -> bool {
            self.clock.detach(chain)
        }
    }

    /// Keeps an output stream alive.
    pub struct StreamHandle {
        thread: Option<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
        underrun: Arc<AtomicBool>,
    }

    impl StreamHandle {
        /// Check and clear the underrun flag.
        pub fn check_underrun(&self) -> bool {
            self.underrun.swap(false, Ordering::Relaxed)
        }
    }

    impl Drop for StreamHandle {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                thread.thread().unpark();
                let _ = thread.join();
            }
        }
    }

    fn open_stream(
        device: &cpal::Device,
        sample_format: SampleFormat,
        config: &cpal::StreamConfig,
        consumer: Consumer<f32>,
        clock: Arc<Clock>,
        block_size: usize,
        underrun: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(device, config, consumer, clock, block_size, underrun),
            SampleFormat::I16 => build_stream::<i16>(device, config, consumer, clock, block_size, underrun),
            SampleFormat::U16 => build_stream::<u16>(device, config, consumer, clock, block_size, underrun),
            other => {
                return Err(DspError::DeviceFailure {
                    reason: format!("unsupported sample format {:?}", other),
                })
            }
        }
        .map_err(|e| DspError::DeviceFailure { reason: e.to_string() })?;

        stream.play().map_err(|e| DspError::DeviceFailure { reason: e.to_string() })?;
        Ok(stream)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: Consumer<f32>,
        clock: Arc<Clock>,
        block_size: usize,
        underrun: Arc<AtomicBool>,
    ) -> core::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = usize::from(config.channels).max(1);
        device.build_output_stream(
            config,
            move |data: &mut [T], _| {
                // the ring is only transport; chains run at block cadence
                clock.advance(data.len() / channels, block_size);

                let mut starved = false;
                for sample in data.iter_mut() {
                    let s = consumer.pop().unwrap_or_else(|_| {
                        starved = true;
                        0.0
                    });
                    *sample = T::from_sample(s.clamp(-1.0, 1.0));
                }
                if starved {
                    underrun.store(true, Ordering::Relaxed);
                }
            },
            |err| tracing::error!(error = %err, "output stream error"),
            None,
        )
    }
}
