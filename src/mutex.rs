use core::marker::PhantomData;

use crate::{
    backoff::BackOff,
    config::BackoffConfig,
    park::{FutexPark, Park, YieldPark, key_of},
    sync::{AtomicBool, AtomicU32, Ordering},
};

/// Raw mutex that parks contended waiters in the parking lot.
pub type AdaptiveMutex = RawAdaptiveMutex<FutexPark>;

/// Raw mutex that yields when it would park.
///
/// It causes busy waiting but never blocks the thread.
pub type YieldAdaptiveMutex = RawAdaptiveMutex<YieldPark>;

/// Exclusive lock that spins briefly, then backs off, then parks.
///
/// The lock state is a single flag. A separate waiter counter tells
/// `unlock` whether a notification is needed, keeping uncontended unlock to one store and one load.
///
/// It guards no data by itself, see [`Mutex`](crate::Mutex) for the data-carrying wrapper.
pub struct RawAdaptiveMutex<P> {
    held: AtomicBool,
    waiters: AtomicU32,
    config: BackoffConfig,
    park: PhantomData<fn() -> P>,
}

impl<P> Default for RawAdaptiveMutex<P> {
    #[inline]
    fn default() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }
}

impl<P> RawAdaptiveMutex<P> {
    #[inline]
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }

    #[inline]
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }

    #[inline]
    #[cfg(not(loom))]
    #[must_use]
    pub const fn with_config(config: BackoffConfig) -> Self {
        RawAdaptiveMutex {
            held: AtomicBool::new(false),
            waiters: AtomicU32::new(0),
            config,
            park: PhantomData,
        }
    }

    #[inline]
    #[cfg(loom)]
    #[must_use]
    pub fn with_config(config: BackoffConfig) -> Self {
        RawAdaptiveMutex {
            held: AtomicBool::new(false),
            waiters: AtomicU32::new(0),
            config,
            park: PhantomData,
        }
    }

    #[inline]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Returns true if the lock is acquired, false otherwise.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Attempts to acquire the lock without blocking.
    /// Returns true if the lock was acquired, false otherwise.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl<P> RawAdaptiveMutex<P>
where
    P: Park,
{
    /// Blocking lock that returns when the lock is acquired.
    #[inline]
    pub fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.lock_slow();
    }

    #[inline(never)]
    #[cold]
    fn lock_slow(&self) {
        let mut backoff = BackOff::with_config(self.config);
        let mut waiting = false;

        loop {
            // Test before test-and-set to keep the line shared while it's held.
            if !self.held.load(Ordering::Relaxed) && self.try_lock() {
                break;
            }

            if backoff.should_block() {
                if !waiting {
                    // Counted once per call, pairs with the load in `unlock`.
                    self.waiters.fetch_add(1, Ordering::SeqCst);
                    waiting = true;
                }
                P::park(key_of(&self.held), || self.held.load(Ordering::SeqCst));
            } else {
                backoff.wait();
            }
        }

        if waiting {
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Releases the lock and wakes one parked waiter if there is any.
    ///
    /// Must only be called by the holder of the lock.
    #[inline]
    pub fn unlock(&self) {
        // Either this load sees a registered waiter
        // or that waiter's validation sees the released flag.
        self.held.store(false, Ordering::SeqCst);

        if self.waiters.load(Ordering::SeqCst) != 0 {
            P::unpark_one(key_of(&self.held));
        }
    }
}

#[cfg(not(loom))]
unsafe impl<P> lock_api::RawMutex for RawAdaptiveMutex<P>
where
    P: Park,
{
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn is_locked(&self) -> bool {
        self.is_locked()
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_lock()
    }

    #[inline]
    fn lock(&self) {
        self.lock();
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.unlock();
    }
}
