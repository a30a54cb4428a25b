//! Tunable thresholds for the waiting strategy and queue sizing.
//!
//! Every primitive carries its own copy of the configuration,
//! there is no process-wide wait state.

use core::time::Duration;

use crate::error::ConfigError;

/// Thresholds of the spin-then-park escalation used by [`BackOff`](crate::backoff::BackOff).
///
/// Waiting starts with `relax_spins` plain CPU-relax hints.
/// Then timed busy-wait rounds follow, starting at `initial_step` and doubling every round
/// until the round would exceed `spin_ceiling`, after which every round yields to the OS scheduler.
/// Once `park_after` has elapsed since the first spin or yield,
/// primitives that can block stop spinning and park the thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffConfig {
    pub relax_spins: u32,
    pub initial_step: Duration,
    pub spin_ceiling: Duration,
    pub park_after: Duration,
}

impl BackoffConfig {
    /// Short spin, park after 20µs of contention.
    pub const DEFAULT: Self = BackoffConfig {
        relax_spins: 2,
        initial_step: Duration::from_nanos(100),
        spin_ceiling: Duration::from_micros(10),
        park_after: Duration::from_micros(20),
    };

    /// No spinning at all, contended waiters park right away.
    pub const IMMEDIATE_PARK: Self = BackoffConfig {
        relax_spins: 0,
        initial_step: Duration::from_nanos(100),
        spin_ceiling: Duration::ZERO,
        park_after: Duration::ZERO,
    };

    /// Checks that the escalation can make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_step.is_zero() && !self.spin_ceiling.is_zero() {
            return Err(ConfigError::StalledBackoff);
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Largest capacity a queue ring may have.
#[cfg(feature = "queue")]
pub const MAX_CAPACITY: u64 = if usize::BITS >= 64 {
    1 << 62
} else {
    1 << (usize::BITS - 1)
};

/// Sizing of a [`ConcurrentQueue`](crate::queue::ConcurrentQueue).
///
/// Capacities are rounded up to the next power of two.
#[cfg(feature = "queue")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueConfig {
    pub initial_capacity: u64,
    pub max_capacity: u64,
    pub backoff: BackoffConfig,
}

#[cfg(feature = "queue")]
impl QueueConfig {
    pub const DEFAULT_CAPACITY: u64 = 4096;

    /// Unbounded queue with given initial capacity.
    #[must_use]
    pub const fn with_capacity(initial_capacity: u64) -> Self {
        QueueConfig {
            initial_capacity,
            max_capacity: MAX_CAPACITY,
            backoff: BackoffConfig::DEFAULT,
        }
    }

    /// Limits how far the queue may grow.
    #[must_use]
    pub const fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Returns initial and maximum capacity rounded to powers of two.
    pub(crate) fn resolve(&self) -> Result<(u64, u64), ConfigError> {
        self.backoff.validate()?;

        if self.max_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let max = round_capacity(self.max_capacity)?;
        let initial = round_capacity(self.initial_capacity)?;

        if initial > max {
            return Err(ConfigError::InitialExceedsMax { initial, max });
        }

        Ok((initial, max))
    }
}

#[cfg(feature = "queue")]
impl Default for QueueConfig {
    #[inline]
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

/// Rounds capacity up to a power of two, at least 1.
#[cfg(feature = "queue")]
pub(crate) fn round_capacity(requested: u64) -> Result<u64, ConfigError> {
    match requested.max(1).checked_next_power_of_two() {
        Some(cap) if cap <= MAX_CAPACITY => Ok(cap),
        _ => Err(ConfigError::CapacityTooLarge {
            requested,
            max: MAX_CAPACITY,
        }),
    }
}
