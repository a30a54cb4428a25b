//! This module abstracts over the park-unpark mechanism.
//!
//! Threads park on an address key and are woken by unparking the same key.
//! Before a thread actually sleeps a validation callback runs.
//! For [`FutexPark`] it runs under the parking-lot bucket lock that unparking also takes,
//! so a waiter that re-checks its condition in the callback cannot miss a notification
//! issued after the condition changed.

/// Generic parking mechanism keyed by address.
///
/// Spurious wakeups are allowed, callers always re-check their condition after `park` returns.
pub trait Park {
    /// Blocks the current thread on `key` if `validate` returns true.
    fn park(key: usize, validate: impl FnOnce() -> bool);

    /// Wakes at most one thread parked on `key`.
    /// Returns true if a thread was woken.
    fn unpark_one(key: usize) -> bool;

    /// Wakes all threads parked on `key`.
    /// Returns number of threads woken.
    fn unpark_all(key: usize) -> usize;
}

/// Blocks threads in the global parking lot.
/// On Linux this ends up in futex syscalls.
pub struct FutexPark;

#[cfg(not(loom))]
impl Park for FutexPark {
    #[inline]
    fn park(key: usize, validate: impl FnOnce() -> bool) {
        tracing::trace!(key, "parking thread");

        // Safety: callbacks neither panic nor call into the parking lot.
        unsafe {
            parking_lot_core::park(
                key,
                validate,
                || {},
                |_, _| {},
                parking_lot_core::DEFAULT_PARK_TOKEN,
                None,
            );
        }
    }

    #[inline]
    fn unpark_one(key: usize) -> bool {
        // Safety: callback neither panics nor calls into the parking lot.
        let result = unsafe {
            parking_lot_core::unpark_one(key, |_| parking_lot_core::DEFAULT_UNPARK_TOKEN)
        };
        result.unparked_threads > 0
    }

    #[inline]
    fn unpark_all(key: usize) -> usize {
        // Safety: key is only used as an identifier.
        unsafe { parking_lot_core::unpark_all(key, parking_lot_core::DEFAULT_UNPARK_TOKEN) }
    }
}

// Loom cannot model the parking lot, yielding is a valid spurious wakeup.
#[cfg(loom)]
impl Park for FutexPark {
    #[inline]
    fn park(key: usize, validate: impl FnOnce() -> bool) {
        YieldPark::park(key, validate);
    }

    #[inline]
    fn unpark_one(key: usize) -> bool {
        YieldPark::unpark_one(key)
    }

    #[inline]
    fn unpark_all(key: usize) -> usize {
        YieldPark::unpark_all(key)
    }
}

/// Yields the current thread when `park` is called instead of blocking it.
/// This behavior is valid since spurious wakeups are allowed.
/// Causes busy waiting.
pub struct YieldPark;

impl Park for YieldPark {
    #[inline]
    fn park(_key: usize, validate: impl FnOnce() -> bool) {
        if validate() {
            crate::sync::yield_now();
        }
    }

    #[inline]
    fn unpark_one(_key: usize) -> bool {
        false
    }

    #[inline]
    fn unpark_all(_key: usize) -> usize {
        0
    }
}

/// Address of a value used as parking key.
#[inline(always)]
pub(crate) fn key_of<T>(value: &T) -> usize {
    core::ptr::from_ref(value) as usize
}
