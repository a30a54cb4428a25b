//! # Comity
//!
//! Adaptive blocking primitives and a growable lock-free queue.
//!
//! All primitives share one waiting strategy: spin briefly with CPU-relax hints,
//! back off with growing timed spins, yield to the scheduler and finally park the thread
//! once waiting took longer than a configured threshold.
//!
//! The queue and the read-write lock each have a feature flag, both enabled by default.
//!
//! ## Available Algorithms
//!
//! ### 🔄 Backoff
//! Escalating wait used by every primitive of this crate.
//! Tuned with [`BackoffConfig`].
//!
//! #### Examples
//!
//! ```rust
//! use comity::backoff::{BackOff, Phase};
//!
//! let mut backoff = BackOff::new();
//! let mut attempts = 0;
//!
//! while attempts < 10 {
//!     attempts += 1;
//!
//!     if backoff.should_block() {
//!         // Give up spinning, a real primitive would park here.
//!         break;
//!     }
//!
//!     match backoff.wait() {
//!         Phase::Relax | Phase::Spin | Phase::Yield => {}
//!     }
//! }
//! ```
//!
//! ### 🔒 Mutex
//! Exclusive lock with spin-then-park acquisition.
//! [`AdaptiveMutex`] implements [`lock_api::RawMutex`], [`Mutex`] wraps data with it.
//!
//! #### Examples
//!
//! ```rust
//! use comity::Mutex;
//! use std::{sync::Arc, thread};
//!
//! let counter = Arc::new(Mutex::new(0u32));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counter = counter.clone();
//!         thread::spawn(move || {
//!             for _ in 0..100 {
//!                 *counter.lock() += 1;
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(*counter.lock(), 400);
//! ```
//!
//! ### 📖 Read-write lock
//! Writer-priority read-write lock. A waiting writer blocks new readers
//! so a steady stream of readers cannot starve it.
//! **Feature:** `rwlock`
//!
//! #### Examples
//!
//! ```rust
//! # #[cfg(feature = "rwlock")]
//! # {
//! use comity::RwLock;
//!
//! let lock = RwLock::new(vec![1, 2, 3]);
//!
//! {
//!     let a = lock.read();
//!     let b = lock.read();
//!     assert_eq!(a.len() + b.len(), 6);
//! }
//!
//! lock.write().push(4);
//! assert_eq!(*lock.read(), [1, 2, 3, 4]);
//! # }
//! ```
//!
//! ### 🔃 Concurrent queue
//! Multi-producer multi-consumer FIFO queue that doubles its ring when full.
//! Pushing never fails unless a maximum capacity is configured, popping never waits.
//! **Feature:** `queue`
//!
//! #### Examples
//!
//! ```rust
//! # #[cfg(feature = "queue")]
//! # {
//! use comity::queue::ConcurrentQueue;
//! use std::{sync::Arc, thread};
//!
//! let queue = Arc::new(ConcurrentQueue::new(4));
//!
//! let producers: Vec<_> = (0..4u64)
//!     .map(|id| {
//!         let queue = queue.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 queue.push(id * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for producer in producers {
//!     producer.join().unwrap();
//! }
//!
//! assert_eq!(queue.len(), 400);
//! assert!(queue.capacity() >= 400);
//!
//! let mut sum = 0;
//! while let Some(value) = queue.pop() {
//!     sum += value;
//! }
//! assert_eq!(sum, (0..4u64).map(|id| id * 100_000 + 4950).sum::<u64>());
//! # }
//! ```
//!
//! Bounded growth:
//!
//! ```rust
//! # #[cfg(feature = "queue")]
//! # {
//! use comity::{QueueConfig, queue::ConcurrentQueue};
//!
//! let queue = ConcurrentQueue::with_config(QueueConfig::with_capacity(2).max_capacity(2)).unwrap();
//!
//! queue.try_push(1).unwrap();
//! queue.try_push(2).unwrap();
//! assert_eq!(queue.try_push(3).unwrap_err().into_inner(), 3);
//! # }
//! ```

#![deny(clippy::pedantic)]
#![allow(
    clippy::inline_always,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

extern crate alloc;

#[cfg(not(loom))]
mod sync;

#[cfg(loom)]
#[path = "sync_loom.rs"]
mod sync;

pub mod backoff;
pub mod config;
pub mod error;
pub mod mutex;
pub mod park;

#[cfg(feature = "queue")]
mod cache;

#[cfg(feature = "queue")]
pub mod queue;

#[cfg(feature = "queue")]
mod ring;

#[cfg(feature = "rwlock")]
pub mod rwlock;

pub use self::{
    backoff::BackOff,
    config::BackoffConfig,
    error::ConfigError,
    mutex::{AdaptiveMutex, RawAdaptiveMutex, YieldAdaptiveMutex},
    park::{FutexPark, Park, YieldPark},
};

#[cfg(feature = "queue")]
pub use self::{
    config::{MAX_CAPACITY, QueueConfig},
    error::PushError,
    queue::{ConcurrentQueue, WorkQueue},
};

#[cfg(feature = "rwlock")]
pub use self::rwlock::{AdaptiveRwLock, RawAdaptiveRwLock, YieldAdaptiveRwLock};

/// Mutex protecting a value with [`AdaptiveMutex`].
pub type Mutex<T> = lock_api::Mutex<AdaptiveMutex, T>;

pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, AdaptiveMutex, T>;

/// Read-write lock protecting a value with [`AdaptiveRwLock`].
#[cfg(feature = "rwlock")]
pub type RwLock<T> = lock_api::RwLock<AdaptiveRwLock, T>;

#[cfg(feature = "rwlock")]
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, AdaptiveRwLock, T>;

#[cfg(feature = "rwlock")]
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, AdaptiveRwLock, T>;

// Single place that reports ring allocation failure.
// A queue that cannot hold its values has no way to continue.
#[cfg(feature = "queue")]
#[cold]
#[inline(never)]
fn alloc_failure(capacity: u64) -> ! {
    tracing::error!(capacity, "failed to allocate queue ring");
    std::process::abort()
}
