//! A chain shared between the real-time thread and the control thread.
//!
//! The real-time side only ever calls [`SharedChain::try_tick`], which takes
//! the lock with `try_lock` and skips the block if the control side holds it.
//! The control side locks normally; [`SharedChain::suspend`] therefore waits
//! at most for the tick in flight, so no partial block is ever observed.

use alloc::format;
use alloc::sync::Arc;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::chain::{Chain, ChainId};
use crate::error::{DspError, Result};

/// Inner storage behind `Arc` so `SharedChain` can be cheaply cloned.
struct SharedChainData {
    id: ChainId,
    chain: Mutex<Chain>,
    /// The real-time side may tick. Cleared while suspending.
    armed: AtomicBool,
    ticks: AtomicU64,
    /// `try_tick` calls that found the chain held by the control side.
    skipped: AtomicU64,
}

/// Cloneable handle to a chain driven by a device.
#[derive(Clone)]
pub struct SharedChain {
    inner: Arc<SharedChainData>,
}

impl SharedChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            inner: Arc::new(SharedChainData {
                id: chain.id(),
                armed: AtomicBool::new(chain.is_running()),
                chain: Mutex::new(chain),
                ticks: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> ChainId {
        self.inner.id
    }

    /// Whether both handles point at the same chain.
    pub fn ptr_eq(&self, other: &SharedChain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Process one block if the chain is running and free.
    ///
    /// Real-time path: never blocks. Returns whether a block was processed.
    pub fn try_tick(&self) -> bool {
        if !self.inner.armed.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.chain.try_lock() {
            Some(mut chain) => {
                chain.tick();
                self.inner.ticks.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                self.inner.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Blocks processed through [`try_tick`](Self::try_tick).
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }

    /// Blocks dropped because the control side held the chain.
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Whether the real-time side is currently allowed to tick.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    /// Control-path access. Blocks until the tick in flight is done.
    pub fn lock(&self) -> ChainGuard<'_> {
        ChainGuard {
            data: &self.inner,
            guard: self.inner.chain.lock(),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Chain) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Wait for the tick in flight, then stop the chain for editing.
    ///
    /// Call [`SuspendGuard::resume`] when done; dropping the guard instead
    /// leaves the chain stopped.
    pub fn suspend(&self) -> Result<SuspendGuard<'_>> {
        self.inner.armed.store(false, Ordering::Release);
        let guard = self.lock();
        Self::suspend_locked(guard)
    }

    /// Like [`suspend`](Self::suspend), giving up after `timeout`.
    pub fn suspend_timeout(&self, timeout: Duration) -> Result<SuspendGuard<'_>> {
        let was_armed = self.inner.armed.swap(false, Ordering::AcqRel);
        let guard = match self.inner.chain.try_lock_for(timeout) {
            Some(guard) => ChainGuard {
                data: &self.inner,
                guard,
            },
            None => {
                self.inner.armed.store(was_armed, Ordering::Release);
                tracing::debug!(chain = %self.inner.id, ?timeout, "suspend timed out");
                return Err(DspError::SuspendFailure {
                    reason: format!("chain still busy after {:?}", timeout),
                });
            }
        };
        Self::suspend_locked(guard)
    }

    fn suspend_locked(mut guard: ChainGuard<'_>) -> Result<SuspendGuard<'_>> {
        let prior = guard.suspend()?;
        Ok(SuspendGuard { guard, prior })
    }
}

impl fmt::Debug for SharedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChain")
            .field("id", &self.inner.id)
            .field("armed", &self.is_armed())
            .field("ticks", &self.ticks())
            .field("skipped", &self.skipped())
            .finish()
    }
}

/// Exclusive control-path access to a shared chain.
///
/// Re-arms the real-time side on drop if the chain is running.
pub struct ChainGuard<'a> {
    data: &'a SharedChainData,
    guard: MutexGuard<'a, Chain>,
}

impl Deref for ChainGuard<'_> {
    type Target = Chain;

    fn deref(&self) -> &Chain {
        &self.guard
    }
}

impl DerefMut for ChainGuard<'_> {
    fn deref_mut(&mut self) -> &mut Chain {
        &mut self.guard
    }
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.data.armed.store(self.guard.is_running(), Ordering::Release);
    }
}

/// A suspended chain, open for structural edits.
pub struct SuspendGuard<'a> {
    guard: ChainGuard<'a>,
    prior: bool,
}

impl SuspendGuard<'_> {
    /// Whether the chain was running before the suspend.
    pub fn prior(&self) -> bool {
        self.prior
    }

    /// Recompile and restart if the chain was running before.
    pub fn resume(mut self) -> Result<()> {
        let prior = self.prior;
        self.guard.resume(prior)
    }
}

impl fmt::Debug for SuspendGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendGuard")
            .field("chain", &*self.guard)
            .field("prior", &self.prior)
            .finish()
    }
}

impl Deref for SuspendGuard<'_> {
    type Target = Chain;

    fn deref(&self) -> &Chain {
        &self.guard
    }
}

impl DerefMut for SuspendGuard<'_> {
    fn deref_mut(&mut self) -> &mut Chain {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSettings;

    fn running() -> SharedChain {
        let mut chain = Chain::new(DeviceSettings::new(48_000, 8));
        chain.start().unwrap();
        SharedChain::new(chain)
    }

    #[test]
    fn try_tick_skips_stopped_chains() {
        let shared = SharedChain::new(Chain::default());
        assert!(!shared.try_tick());
        assert_eq!(shared.ticks(), 0);
    }

    #[test]
    fn try_tick_is_skipped_while_locked() {
        let shared = running();
        assert!(shared.try_tick());
        {
            let _guard = shared.lock();
            assert!(!shared.try_tick());
        }
        assert_eq!(shared.skipped(), 1);
        assert!(shared.try_tick());
        assert_eq!(shared.ticks(), 2);
    }

    #[test]
    fn suspend_and_resume_rearms() {
        let shared = running();
        let guard = shared.suspend().unwrap();
        assert!(guard.prior());
        assert!(!guard.is_running());
        guard.resume().unwrap();

        assert!(shared.is_armed());
        assert!(shared.try_tick());
    }

    #[test]
    fn dropping_the_guard_leaves_the_chain_stopped() {
        let shared = running();
        drop(shared.suspend().unwrap());
        assert!(!shared.is_armed());
        assert!(!shared.lock().is_running());
    }

    #[test]
    fn suspend_timeout_fails_while_held() {
        let shared = running();
        let other = shared.clone();
        let _held = shared.lock();

        let err = other.suspend_timeout(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, DspError::SuspendFailure { .. }));
    }
}
