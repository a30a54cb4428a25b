//! Multi-producer multi-consumer queue over a ring of sequenced slots
//! that grows in place when it runs full.
//!
//! Producers and consumers claim logical positions by advancing `tail` and `head` counters.
//! Each slot's sequence number says whether it is writable or readable for the position
//! that maps to it, so contended operations never observe partially written values.
//!
//! Resizing swaps the whole ring. Every operation registers itself in the `active` counter
//! before touching the ring and checks the resize state again after registering.
//! The resizer flips the state first and then waits for `active` to drop to zero,
//! at which point no thread can hold a reference into the old ring.

use core::{fmt, marker::PhantomData};

use alloc::{boxed::Box, vec::Vec};

use crate::{
    backoff::BackOff,
    cache::CachePadded,
    config::{MAX_CAPACITY, QueueConfig},
    error::{ConfigError, PushError},
    mutex::AdaptiveMutex,
    park::{FutexPark, Park, key_of},
    ring::SlotRing,
    sync::{AtomicPtr, AtomicU32, AtomicU64, Ordering},
};

const NORMAL: u32 = 0;
const RESIZING: u32 = 1;

/// Face of the queue used by task schedulers.
pub trait WorkQueue<T> {
    /// Pushes a task. Returns false if the queue is full at its maximum capacity.
    fn enqueue(&self, task: T) -> bool;

    /// Pops a task if any is ready.
    fn dequeue(&self) -> Option<T>;

    /// Approximate number of queued tasks.
    fn approx_len(&self) -> u64;
}

/// Lock-free bounded MPMC queue with dynamic resize.
///
/// `push` never fails, when the ring is full it is doubled.
/// Growth may be limited with [`QueueConfig::max_capacity`],
/// in which case `push` waits for consumers and `try_push` hands the value back.
///
/// `pop` never waits for values. It returns `None` when the next value is not ready.
///
/// Values are popped in the order in which producers claimed positions.
pub struct ConcurrentQueue<T> {
    /// Current ring. Replaced only in resizing state after quiescence.
    ring: CachePadded<AtomicPtr<SlotRing<T>>>,

    /// Mirror of the current ring's capacity for lock-free snapshots.
    capacity: CachePadded<AtomicU64>,

    /// Next position to pop. Never wraps in practice.
    head: CachePadded<AtomicU64>,

    /// Next position to push. Never wraps in practice.
    tail: CachePadded<AtomicU64>,

    /// Number of threads currently inside push/pop with a reference to the ring.
    active: CachePadded<AtomicU64>,

    /// `NORMAL` or `RESIZING`, threads park on it while a resize runs.
    state: CachePadded<AtomicU32>,

    /// Serializes `clear` and `shrink_to_fit`.
    maintenance: AdaptiveMutex,

    max_capacity: u64,
    config: QueueConfig,

    marker: PhantomData<T>,
}

unsafe impl<T> Send for ConcurrentQueue<T> where T: Send {}
unsafe impl<T> Sync for ConcurrentQueue<T> where T: Send {}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        // Safety: exclusive access, the pointer came from `Box::into_raw`
        // and positions `head..tail` are exactly the live values.
        unsafe {
            let ring = Box::from_raw(self.ring.load(Ordering::Relaxed));
            ring.drop_range(head, tail);
        }
    }
}

impl<T> Default for ConcurrentQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new(QueueConfig::DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Registration of a thread that is working with the current ring.
/// Dropping it deregisters.
struct Presence<'a> {
    active: &'a AtomicU64,
}

impl Drop for Presence<'_> {
    #[inline]
    fn drop(&mut self) {
        // Release: everything this thread did to the ring happens-before
        // the resizer observing zero active threads.
        self.active.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive resize state. Dropping it returns the queue to normal and wakes waiters.
struct Resizing<'a> {
    state: &'a AtomicU32,
}

impl Drop for Resizing<'_> {
    #[inline]
    fn drop(&mut self) {
        self.state.store(NORMAL, Ordering::SeqCst);
        FutexPark::unpark_all(key_of(self.state));
    }
}

enum Attempt<T, R> {
    Done(R),
    Full { value: T, capacity: u64 },
    Busy(T),
}

impl<T> ConcurrentQueue<T> {
    /// Creates unbounded queue.
    ///
    /// Capacity is rounded up to the next power of two
    /// and clamped to [`MAX_CAPACITY`].
    #[must_use]
    pub fn new(initial_capacity: u64) -> Self {
        let config = QueueConfig::with_capacity(initial_capacity.min(MAX_CAPACITY));
        match Self::with_config(config) {
            Ok(queue) => queue,
            Err(_) => unreachable!("clamped capacity is always valid"),
        }
    }

    /// Creates queue with given sizing and waiting thresholds.
    pub fn with_config(config: QueueConfig) -> Result<Self, ConfigError> {
        let (initial, max_capacity) = config.resolve()?;
        let ring = Box::new(SlotRing::with_base(initial, 0));

        Ok(ConcurrentQueue {
            ring: CachePadded(AtomicPtr::new(Box::into_raw(ring))),
            capacity: CachePadded(AtomicU64::new(initial)),
            head: CachePadded(AtomicU64::new(0)),
            tail: CachePadded(AtomicU64::new(0)),
            active: CachePadded(AtomicU64::new(0)),
            state: CachePadded(AtomicU32::new(NORMAL)),
            maintenance: AdaptiveMutex::new(),
            max_capacity,
            config,
            marker: PhantomData,
        })
    }

    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of values in the queue.
    ///
    /// This is a snapshot and may be stale by the time it is returned.
    #[inline]
    pub fn len(&self) -> u64 {
        // Head first, tail never falls behind a head read before it.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity.
    ///
    /// This is a snapshot and may be stale by the time it is returned.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Largest capacity the queue may grow to.
    #[inline]
    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    /// Pushes value to the queue.
    ///
    /// Grows the queue when it is full.
    /// If it is full at maximum capacity waits until a consumer frees a slot.
    pub fn push(&self, value: T) {
        let mut value = value;
        let mut backoff = BackOff::with_config(self.config.backoff);

        loop {
            match self.push_attempt(value) {
                Attempt::Done(()) => return,
                Attempt::Full {
                    value: rejected,
                    capacity,
                } => {
                    value = rejected;
                    if capacity < self.max_capacity {
                        self.grow(capacity);
                    } else {
                        backoff.wait();
                    }
                }
                Attempt::Busy(rejected) => {
                    value = rejected;
                    backoff.wait();
                }
            }
        }
    }

    /// Pushes value to the queue.
    ///
    /// Grows the queue when it is full.
    /// If it is full at maximum capacity returns the value back.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        let mut value = value;
        let mut backoff = BackOff::with_config(self.config.backoff);

        loop {
            match self.push_attempt(value) {
                Attempt::Done(()) => return Ok(()),
                Attempt::Full {
                    value: rejected,
                    capacity,
                } => {
                    if capacity >= self.max_capacity {
                        return Err(PushError::Full(rejected));
                    }
                    value = rejected;
                    self.grow(capacity);
                }
                Attempt::Busy(rejected) => {
                    value = rejected;
                    backoff.wait();
                }
            }
        }
    }

    /// Pops value from the queue.
    ///
    /// Returns `None` without waiting if no value is ready.
    pub fn pop(&self) -> Option<T> {
        let mut backoff = BackOff::with_config(self.config.backoff);

        loop {
            match self.pop_attempt() {
                Attempt::Done(value) => return value,
                Attempt::Full { .. } | Attempt::Busy(()) => {
                    backoff.wait();
                }
            }
        }
    }

    fn push_attempt(&self, value: T) -> Attempt<T, ()> {
        let _presence = self.enter();

        // Safety: registered, the ring is not replaced until we leave.
        let ring = unsafe { &*self.ring.load(Ordering::Acquire) };

        let pos = self.tail.load(Ordering::Relaxed);
        let slot = ring.slot_at(pos);
        let seq = slot.sequence(Ordering::Acquire);

        #[allow(clippy::cast_possible_wrap)]
        let diff = seq.wrapping_sub(pos) as i64;

        if diff == 0 {
            if self
                .tail
                .compare_exchange_weak(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                // Safety: slot is writable for `pos` and we won it.
                unsafe {
                    slot.publish(pos, value);
                }
                return Attempt::Done(());
            }
            Attempt::Busy(value)
        } else if diff < 0 {
            // Slot still holds a value from the previous lap.
            Attempt::Full {
                value,
                capacity: ring.capacity(),
            }
        } else {
            // Another producer claimed `pos` already.
            Attempt::Busy(value)
        }
    }

    fn pop_attempt(&self) -> Attempt<(), Option<T>> {
        let _presence = self.enter();

        // Safety: registered, the ring is not replaced until we leave.
        let ring = unsafe { &*self.ring.load(Ordering::Acquire) };

        let pos = self.head.load(Ordering::Relaxed);
        let slot = ring.slot_at(pos);
        let seq = slot.sequence(Ordering::Acquire);

        #[allow(clippy::cast_possible_wrap)]
        let diff = seq.wrapping_sub(pos.wrapping_add(1)) as i64;

        if diff == 0 {
            if self
                .head
                .compare_exchange_weak(pos, pos.wrapping_add(1), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                // Safety: slot is readable for `pos` and we won it.
                let value = unsafe { slot.consume(pos.wrapping_add(ring.capacity())) };
                return Attempt::Done(Some(value));
            }
            Attempt::Busy(())
        } else if diff < 0 {
            // Nothing published at `pos` yet.
            Attempt::Done(None)
        } else {
            // Another consumer took `pos` already.
            Attempt::Busy(())
        }
    }

    /// Registers current thread as active once no resize is running.
    fn enter(&self) -> Presence<'_> {
        let mut backoff = BackOff::with_config(self.config.backoff);

        loop {
            if self.state.load(Ordering::Acquire) == RESIZING {
                self.wait_resize(&mut backoff);
                continue;
            }

            self.active.fetch_add(1, Ordering::SeqCst);
            let presence = Presence {
                active: &self.active,
            };

            // Resize may have started between the check and the registration.
            if self.state.load(Ordering::SeqCst) == NORMAL {
                return presence;
            }
            drop(presence);
        }
    }

    fn wait_resize(&self, backoff: &mut BackOff) {
        if backoff.should_block() {
            FutexPark::park(key_of(&*self.state), || {
                self.state.load(Ordering::Acquire) == RESIZING
            });
        } else {
            backoff.wait();
        }
    }

    /// Switches to resizing state if no resize is running.
    fn try_begin_resize(&self) -> Option<Resizing<'_>> {
        self.state
            .compare_exchange(NORMAL, RESIZING, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| Resizing { state: &self.state })
    }

    /// Switches to resizing state, waiting for a running resize to finish first.
    fn begin_resize(&self) -> Resizing<'_> {
        let mut backoff = BackOff::with_config(self.config.backoff);
        loop {
            if let Some(resizing) = self.try_begin_resize() {
                return resizing;
            }
            self.wait_resize(&mut backoff);
        }
    }

    /// Waits until no thread holds a reference into the ring.
    fn wait_quiescent(&self, _resizing: &Resizing<'_>) {
        let mut backoff = BackOff::with_config(self.config.backoff);
        while self.active.load(Ordering::SeqCst) != 0 {
            backoff.wait();
        }
    }

    /// Doubles capacity if it is still `observed`.
    ///
    /// Only one thread resizes at a time, others return immediately
    /// and retry against whatever ring they find next.
    #[cold]
    #[inline(never)]
    fn grow(&self, observed: u64) {
        let Some(resizing) = self.try_begin_resize() else {
            return;
        };
        self.wait_quiescent(&resizing);

        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity != observed {
            // Somebody else grew it meanwhile.
            return;
        }

        let new_capacity = capacity.saturating_mul(2).min(self.max_capacity);
        if new_capacity <= capacity {
            return;
        }

        self.relocate(new_capacity, &resizing);

        if new_capacity == self.max_capacity {
            tracing::warn!(capacity = new_capacity, "queue reached its maximum capacity");
        }
    }

    /// Moves live values into a new ring of `new_capacity`.
    ///
    /// Requires resizing state and quiescence.
    fn relocate(&self, new_capacity: u64, _resizing: &Resizing<'_>) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert!(tail.wrapping_sub(head) <= new_capacity);

        let old_ptr = self.ring.load(Ordering::Relaxed);

        // Safety: quiescent, no other thread references the old ring.
        let old = unsafe { Box::from_raw(old_ptr) };
        let new = Box::new(SlotRing::with_base(new_capacity, head));

        let mut pos = head;
        while pos != tail {
            // Safety: every position in `head..tail` is published
            // since producers stay registered until they publish.
            unsafe {
                let value = old.slot_at(pos).take();
                new.slot_at(pos).restore(pos, value);
            }
            pos = pos.wrapping_add(1);
        }

        tracing::debug!(
            from = old.capacity(),
            to = new_capacity,
            len = tail.wrapping_sub(head),
            "queue resized"
        );

        // Release: slots of the new ring are initialized before threads entering later see it.
        self.ring.store(Box::into_raw(new), Ordering::Release);
        self.capacity.store(new_capacity, Ordering::Release);

        // Values were moved out, dropping the old ring only frees its storage.
        drop(old);
    }

    /// Drops all values in the queue.
    ///
    /// Values are removed under exclusive control and dropped after it is released.
    pub fn clear(&self) {
        let removed = {
            self.maintenance.lock();
            let removed = self.take_all();
            self.maintenance.unlock();
            removed
        };

        tracing::debug!(dropped = removed.len(), "queue cleared");
        drop(removed);
    }

    fn take_all(&self) -> Vec<T> {
        let resizing = self.begin_resize();
        self.wait_quiescent(&resizing);

        // Safety: quiescent, no other thread references the ring.
        let ring = unsafe { &*self.ring.load(Ordering::Relaxed) };

        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        let mut removed = Vec::new();
        if let Ok(len) = usize::try_from(tail.wrapping_sub(head)) {
            removed.reserve_exact(len);
        }

        let mut pos = head;
        while pos != tail {
            let slot = ring.slot_at(pos);
            // Safety: every position in `head..tail` holds a published value.
            removed.push(unsafe { slot.take() });
            slot.rearm(pos.wrapping_add(ring.capacity()), Ordering::Relaxed);
            pos = pos.wrapping_add(1);
        }

        // Published to later threads by the state release in `Resizing::drop`.
        self.head.store(tail, Ordering::Relaxed);
        removed
    }

    /// Resizes the queue to fit `target` values, but never below current length.
    ///
    /// Resulting capacity is rounded up to a power of two and capped at maximum capacity.
    /// May grow the queue if `target` is larger than current capacity.
    pub fn shrink_to_fit(&self, target: u64) {
        self.maintenance.lock();

        let resizing = self.begin_resize();
        self.wait_quiescent(&resizing);

        let len = self.len();
        let capacity = self.capacity.load(Ordering::Relaxed);
        let new_capacity = target
            .max(len)
            .max(1)
            .checked_next_power_of_two()
            .map_or(self.max_capacity, |cap| cap.min(self.max_capacity));

        if new_capacity != capacity {
            self.relocate(new_capacity, &resizing);
        }

        drop(resizing);
        self.maintenance.unlock();
    }
}

impl<T> WorkQueue<T> for ConcurrentQueue<T> {
    #[inline]
    fn enqueue(&self, task: T) -> bool {
        self.try_push(task).is_ok()
    }

    #[inline]
    fn dequeue(&self) -> Option<T> {
        self.pop()
    }

    #[inline]
    fn approx_len(&self) -> u64 {
        self.len()
    }
}
