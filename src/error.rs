//! Error types.
//!
//! Contention, busy slots and resizes in progress are never reported,
//! callers retry them internally. Only configuration mistakes and a queue
//! that hit its configured capacity limit surface as errors.

use core::fmt;

/// Rejected configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("maximum capacity must be non-zero")]
    ZeroCapacity,

    #[error("capacity {requested} exceeds the supported maximum of {max}")]
    CapacityTooLarge { requested: u64, max: u64 },

    #[error("initial capacity {initial} exceeds maximum capacity {max}")]
    InitialExceedsMax { initial: u64, max: u64 },

    #[error("backoff with a zero initial step and a non-zero spin ceiling never escalates")]
    StalledBackoff,
}

/// Error returned by `ConcurrentQueue::try_push`.
///
/// The value that could not be pushed is handed back to the caller.
#[derive(Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError<T> {
    #[error("queue is full at its maximum capacity")]
    Full(T),
}

impl<T> PushError<T> {
    /// Returns the value that was not pushed.
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(value) => value,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.debug_tuple("Full").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_error_returns_value() {
        struct NoDebug(u32);

        let err = PushError::Full(NoDebug(7));
        assert_eq!(format!("{err:?}"), "Full(..)");
        assert_eq!(err.to_string(), "queue is full at its maximum capacity");
        assert_eq!(err.into_inner().0, 7);
    }

    #[test]
    fn config_error_messages() {
        let err = ConfigError::InitialExceedsMax {
            initial: 64,
            max: 16,
        };
        assert_eq!(
            err.to_string(),
            "initial capacity 64 exceeds maximum capacity 16"
        );
    }
}
