//! Context - owns the device manager and the chains it drives

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use delegate::delegate;
use parking_lot::Mutex;

use crate::chain::Chain;
use crate::device::{DeviceManager, DeviceSettings};
use crate::error::Result;
use crate::shared::SharedChain;

/// Top-level owner of a device manager and its chains.
///
/// Chains created or adopted here are attached to the device's clock and keep
/// a weak reference back, reachable through [`Chain::context`].
///
/// ```
/// use std::sync::Arc;
/// use dspchain::{Context, DeviceSettings, OfflineDevice};
/// use dspchain::nodes::Sine;
///
/// let device = Arc::new(OfflineDevice::new(DeviceSettings::new(48_000, 32)));
/// let context = Context::new(device.clone());
///
/// let chain = context.create_chain();
/// chain.with(|c| {
///     c.add(Sine::new(440.0)).unwrap();
///     c.start()
/// }).unwrap();
///
/// device.run(10);
/// assert_eq!(chain.lock().blocks_processed(), 10);
/// ```
pub struct Context {
    device: Arc<dyn DeviceManager>,
    chains: Mutex<Vec<SharedChain>>,
}

impl Context {
    pub fn new(device: Arc<dyn DeviceManager>) -> Arc<Self> {
        tracing::debug!(device = device.name(), settings = ?device.settings(), "context created");
        Arc::new(Self {
            device,
            chains: Mutex::new(Vec::new()),
        })
    }

    pub fn device_manager(&self) -> Arc<dyn DeviceManager> {
        Arc::clone(&self.device)
    }

    delegate! {
        to self.device {
            pub fn settings(&self) -> DeviceSettings;
            pub fn sample_rate(&self) -> u32;
            pub fn block_size(&self) -> usize;
        }
    }

    /// A new, empty chain at the device's settings, attached to the device.
    pub fn create_chain(self: &Arc<Self>) -> SharedChain {
        self.adopt(Chain::new(self.settings()))
    }

    /// Take ownership of `chain` and attach it to the device.
    ///
    /// The chain follows the device's settings from its next start on.
    pub fn adopt(self: &Arc<Self>, mut chain: Chain) -> SharedChain {
        chain.set_context(Arc::downgrade(self));
        let shared = SharedChain::new(chain);

        self.device.attach(shared.clone());
        self.chains.lock().push(shared.clone());
        tracing::debug!(chain = %shared.id(), device = self.device.name(), "chain adopted");
        shared
    }

    /// Stop `chain` and detach it from the device. Returns whether it
    /// belonged to this context.
    pub fn remove_chain(&self, chain: &SharedChain) -> bool {
        let removed = {
            let mut chains = self.chains.lock();
            let before = chains.len();
            chains.retain(|c| !c.ptr_eq(chain));
            before != chains.len()
        };
        if removed {
            self.device.detach(chain);
            chain.lock().stop();
            tracing::debug!(chain = %chain.id(), "chain removed from context");
        }
        removed
    }

    pub fn chains(&self) -> Vec<SharedChain> {
        self.chains.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop_all(&self) {
        for chain in self.chains() {
            chain.lock().stop();
        }
    }

    /// Start every chain, stopping at the first failure.
    pub fn start_all(&self) -> Result<()> {
        for chain in self.chains() {
            chain.lock().start()?;
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for chain in self.chains.get_mut().drain(..) {
            self.device.detach(&chain);
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device.name())
            .field("chains", &self.chains.lock().len())
            .finish()
    }
}
