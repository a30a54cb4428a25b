use core::time::Duration;
use std::time::Instant;

use crate::{
    config::BackoffConfig,
    sync::{spin_loop, yield_now},
};

/// What a call to [`BackOff::wait`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Single CPU-relax hint.
    Relax,
    /// Timed busy-wait round.
    Spin,
    /// Yielded to the OS scheduler.
    Yield,
}

/// Waiting hint.
/// Provides common spin-then-yield logic.
/// First few waits only hint the CPU, then waits become timed busy loops
/// with doubling duration. When a round would exceed the spin ceiling it yields instead.
/// When waiting took longer than the park threshold it advises caller to block thread.
///
/// The clock starts on the first wait past the relax hints,
/// uncontended callers never read it.
pub struct BackOff {
    config: BackoffConfig,
    relaxed: u32,
    step: Duration,
    started: Option<Instant>,
}

impl Default for BackOff {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl BackOff {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }

    #[inline]
    #[must_use]
    pub fn with_config(config: BackoffConfig) -> Self {
        BackOff {
            config,
            relaxed: 0,
            step: config.initial_step,
            started: None,
        }
    }

    /// Starts escalation over as if the backoff was just created.
    #[inline]
    pub fn reset(&mut self) {
        self.relaxed = 0;
        self.step = self.config.initial_step;
        self.started = None;
    }

    /// Phase that the next [`wait`](Self::wait) will perform.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.relaxed < self.config.relax_spins {
            Phase::Relax
        } else if !self.config.spin_ceiling.is_zero() && self.step <= self.config.spin_ceiling {
            Phase::Spin
        } else {
            Phase::Yield
        }
    }

    /// Waits a little and escalates for the next call.
    /// Returns the phase that was performed.
    pub fn wait(&mut self) -> Phase {
        let phase = self.phase();
        if phase != Phase::Relax && self.started.is_none() {
            self.started = Some(Instant::now());
        }
        match phase {
            Phase::Relax => {
                self.relaxed += 1;
                spin_loop();
            }
            Phase::Spin => {
                let deadline = Instant::now() + self.step;
                while Instant::now() < deadline {
                    spin_loop();
                }
                self.step = self.step.saturating_mul(2);
            }
            Phase::Yield => yield_now(),
        }
        phase
    }

    /// Time spent waiting past the relax hints.
    /// Zero until the first spin or yield.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |started| started.elapsed())
    }

    /// Returns true when spinning is no longer worthwhile and caller should park.
    #[must_use]
    pub fn should_block(&self) -> bool {
        if self.relaxed < self.config.relax_spins {
            return false;
        }
        self.config.park_after.is_zero() || self.elapsed() >= self.config.park_after
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn escalates_relax_spin_yield() {
        let mut backoff = BackOff::with_config(BackoffConfig {
            relax_spins: 2,
            initial_step: Duration::from_nanos(100),
            spin_ceiling: Duration::from_nanos(400),
            park_after: Duration::from_secs(60),
        });

        assert_eq!(backoff.wait(), Phase::Relax);
        assert_eq!(backoff.wait(), Phase::Relax);
        // 100ns, 200ns, 400ns
        assert_eq!(backoff.wait(), Phase::Spin);
        assert_eq!(backoff.wait(), Phase::Spin);
        assert_eq!(backoff.wait(), Phase::Spin);
        assert_eq!(backoff.wait(), Phase::Yield);
        assert_eq!(backoff.wait(), Phase::Yield);
        assert!(!backoff.should_block());

        backoff.reset();
        assert_eq!(backoff.phase(), Phase::Relax);
    }

    #[test]
    fn relax_hints_do_not_start_clock() {
        let mut backoff = BackOff::new();
        assert_eq!(backoff.wait(), Phase::Relax);
        assert_eq!(backoff.wait(), Phase::Relax);
        assert!(backoff.started.is_none());
        assert_eq!(backoff.elapsed(), Duration::ZERO);

        assert_eq!(backoff.wait(), Phase::Spin);
        assert!(backoff.started.is_some());

        backoff.reset();
        assert!(backoff.started.is_none());
    }

    #[test]
    fn immediate_park_blocks_right_away() {
        let backoff = BackOff::with_config(BackoffConfig::IMMEDIATE_PARK);
        assert!(backoff.should_block());
        assert_eq!(backoff.phase(), Phase::Yield);
    }

    #[test]
    fn blocks_after_threshold() {
        let mut backoff = BackOff::with_config(BackoffConfig {
            relax_spins: 1,
            initial_step: Duration::from_nanos(100),
            spin_ceiling: Duration::from_micros(1),
            park_after: Duration::from_millis(1),
        });
        assert!(!backoff.should_block());

        while !backoff.should_block() {
            backoff.wait();
        }
        assert!(backoff.elapsed() >= Duration::from_millis(1));
    }
}
