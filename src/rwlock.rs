//! Writer-priority reader-writer lock.
//!
//! Lock state is packed into one word:
//!
//! ```text
//! bit 63      - writer holds the lock
//! bits 32..63 - number of writers waiting for the lock
//! bits 0..32  - number of readers holding the lock
//! ```
//!
//! While any writer is waiting new readers are not admitted,
//! so a stream of short read sections cannot starve a writer.
//! Readers and writers park on separate wake tokens.
//! A token is bumped before every notification,
//! and a waiter only sleeps while the token still holds the value it read
//! before re-checking the lock state, which closes the window between
//! registering as a waiter and actually parking.

use core::marker::PhantomData;

use crate::{
    backoff::BackOff,
    config::BackoffConfig,
    park::{FutexPark, Park, YieldPark, key_of},
    sync::{AtomicU32, AtomicU64, Ordering},
};

const WRITER: u64 = 1 << 63;
const PENDING_ONE: u64 = 1 << 32;
const PENDING_MASK: u64 = WRITER - PENDING_ONE;
const READER_MASK: u64 = PENDING_ONE - 1;

/// Reader-writer lock that parks contended waiters in the parking lot.
pub type AdaptiveRwLock = RawAdaptiveRwLock<FutexPark>;

/// Reader-writer lock that yields when it would park.
///
/// It causes busy waiting but never blocks the thread.
pub type YieldAdaptiveRwLock = RawAdaptiveRwLock<YieldPark>;

/// Shared-exclusive lock that spins briefly, then backs off, then parks.
///
/// Lock state is the packed word described above. Readers and writers keep
/// separate waiter counters so unlock only notifies when someone actually parked.
///
/// It guards no data by itself, see [`RwLock`](crate::RwLock) for the data-carrying wrapper.
///
/// ```
/// use comity::AdaptiveRwLock;
///
/// let lock = AdaptiveRwLock::new();
///
/// lock.read_lock();
/// assert!(lock.is_locked());
/// assert!(!lock.is_locked_exclusive());
/// assert!(!lock.try_write_lock());
/// lock.read_unlock();
///
/// lock.write_lock();
/// assert!(lock.is_locked_exclusive());
/// lock.write_unlock();
/// ```
pub struct RawAdaptiveRwLock<P> {
    state: AtomicU64,
    reader_waiters: AtomicU32,
    writer_waiters: AtomicU32,
    reader_token: AtomicU32,
    writer_token: AtomicU32,
    config: BackoffConfig,
    park: PhantomData<fn() -> P>,
}

impl<P> Default for RawAdaptiveRwLock<P> {
    #[inline]
    fn default() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }
}

impl<P> RawAdaptiveRwLock<P> {
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
        RawAdaptiveRwLock {
            state: AtomicU64::new(0),
            reader_waiters: AtomicU32::new(0),
            writer_waiters: AtomicU32::new(0),
            reader_token: AtomicU32::new(0),
            writer_token: AtomicU32::new(0),
            config,
            park: PhantomData,
        }
    }

    #[inline]
    #[cfg(loom)]
    #[must_use]
    pub fn with_config(config: BackoffConfig) -> Self {
        RawAdaptiveRwLock {
            state: AtomicU64::new(0),
            reader_waiters: AtomicU32::new(0),
            writer_waiters: AtomicU32::new(0),
            reader_token: AtomicU32::new(0),
            writer_token: AtomicU32::new(0),
            config,
            park: PhantomData,
        }
    }

    #[inline]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Returns true if the lock is acquired in any way, false otherwise.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & (WRITER | READER_MASK) != 0
    }

    #[inline]
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }

    /// Returns true if some writer waits for the lock.
    /// New readers are not admitted while this holds.
    #[inline]
    pub fn has_pending_writer(&self) -> bool {
        self.state.load(Ordering::Relaxed) & PENDING_MASK != 0
    }

    /// Attempts to acquire the shared lock without blocking.
    ///
    /// Fails while a writer holds the lock or waits for it.
    #[inline]
    pub fn try_read_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state & (WRITER | PENDING_MASK) != 0 || state & READER_MASK == READER_MASK {
                return false;
            }

            // Other readers may race us, retry as long as admission holds.
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    /// Attempts to acquire the exclusive lock without blocking.
    ///
    /// Fails if the lock is held or other writers wait for it.
    #[inline]
    pub fn try_write_lock(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl<P> RawAdaptiveRwLock<P>
where
    P: Park,
{
    /// Blocking shared lock that returns when the lock is acquired.
    #[inline]
    pub fn read_lock(&self) {
        if self.try_read_lock() {
            return;
        }
        self.read_lock_slow();
    }

    #[inline(never)]
    #[cold]
    fn read_lock_slow(&self) {
        let mut backoff = BackOff::with_config(self.config);
        let mut waiting = false;

        loop {
            // State is re-read by every attempt.
            if self.try_read_lock() {
                break;
            }

            if backoff.should_block() {
                if !waiting {
                    self.reader_waiters.fetch_add(1, Ordering::SeqCst);
                    waiting = true;
                }

                let token = self.reader_token.load(Ordering::SeqCst);
                let state = self.state.load(Ordering::SeqCst);
                if state & (WRITER | PENDING_MASK) != 0 {
                    P::park(key_of(&self.reader_token), || {
                        self.reader_token.load(Ordering::SeqCst) == token
                    });
                }
            } else {
                backoff.wait();
            }
        }

        if waiting {
            self.reader_waiters.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Blocking exclusive lock that returns when the lock is acquired.
    #[inline]
    pub fn write_lock(&self) {
        if self.try_write_lock() {
            return;
        }
        self.write_lock_slow();
    }

    #[inline(never)]
    #[cold]
    fn write_lock_slow(&self) {
        // Announce before anything else so that no new reader gets in.
        let mut state = self.state.fetch_add(PENDING_ONE, Ordering::SeqCst) + PENDING_ONE;

        let mut backoff = BackOff::with_config(self.config);
        let mut waiting = false;

        loop {
            if state & (WRITER | READER_MASK) == 0 {
                match self.state.compare_exchange_weak(
                    state,
                    (state - PENDING_ONE) | WRITER,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => {
                        state = actual;
                        continue;
                    }
                }
            }

            if backoff.should_block() {
                if !waiting {
                    self.writer_waiters.fetch_add(1, Ordering::SeqCst);
                    waiting = true;
                }

                let token = self.writer_token.load(Ordering::SeqCst);
                if self.state.load(Ordering::SeqCst) & (WRITER | READER_MASK) != 0 {
                    P::park(key_of(&self.writer_token), || {
                        self.writer_token.load(Ordering::SeqCst) == token
                    });
                }
            } else {
                backoff.wait();
            }

            state = self.state.load(Ordering::Relaxed);
        }

        if waiting {
            self.writer_waiters.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Releases shared lock.
    ///
    /// Must only be called by a holder of the shared lock.
    #[inline]
    pub fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::SeqCst);
        debug_assert_ne!(prev & READER_MASK, 0, "read_unlock called on unlocked RwLock");

        if prev & READER_MASK == 1 {
            self.wake(prev - 1);
        }
    }

    /// Releases exclusive lock.
    ///
    /// Must only be called by the holder of the exclusive lock.
    #[inline]
    pub fn write_unlock(&self) {
        let prev = self.state.fetch_and(!WRITER, Ordering::SeqCst);
        debug_assert_ne!(prev & WRITER, 0, "write_unlock called on unlocked RwLock");

        self.wake(prev & !WRITER);
    }

    /// Hands the released lock over, to one writer if some wait, to all readers otherwise.
    #[inline]
    fn wake(&self, state: u64) {
        if state & PENDING_MASK != 0 && self.writer_waiters.load(Ordering::SeqCst) != 0 {
            self.writer_token.fetch_add(1, Ordering::SeqCst);
            P::unpark_one(key_of(&self.writer_token));
        } else if self.reader_waiters.load(Ordering::SeqCst) != 0 {
            self.reader_token.fetch_add(1, Ordering::SeqCst);
            P::unpark_all(key_of(&self.reader_token));
        }
    }
}

#[cfg(not(loom))]
unsafe impl<P> lock_api::RawRwLock for RawAdaptiveRwLock<P>
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
    fn is_locked_exclusive(&self) -> bool {
        self.is_locked_exclusive()
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        self.try_read_lock()
    }

    #[inline]
    fn lock_shared(&self) {
        self.read_lock();
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        self.read_unlock();
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        self.try_write_lock()
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.write_lock();
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        self.write_unlock();
    }
}
