//! Fixed-capacity ring of sequenced slots.
//!
//! This is the only place where values are written into and read out of
//! uninitialized storage. Whether a slot holds a value is encoded by its sequence number:
//!
//! * `sequence == pos` - slot is empty and writable for logical position `pos`.
//! * `sequence == pos + 1` - slot holds the value for position `pos`.
//! * after consumption the slot is rearmed to `pos + capacity`, writable on the next lap.
//!
//! The ring itself never drops values. Its owner tracks the live range and
//! must drain it before the ring is dropped.

use alloc::{boxed::Box, vec::Vec};

use crate::sync::{AtomicU64, MaybeUninit, Ordering, UnsafeCell, drop_cell, read_cell, write_cell};

pub(crate) struct Slot<T> {
    sequence: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    #[inline]
    fn new(sequence: u64) -> Self {
        Slot {
            sequence: AtomicU64::new(sequence),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Loads the sequence number.
    /// `Acquire` makes the value written before a `publish` visible.
    #[inline(always)]
    pub fn sequence(&self, order: Ordering) -> u64 {
        self.sequence.load(order)
    }

    /// Writes value for position `pos` and marks the slot readable.
    ///
    /// # Safety
    ///
    /// The caller must own position `pos`, i.e. have observed `sequence == pos`
    /// and won the tail counter for it.
    #[inline(always)]
    pub unsafe fn publish(&self, pos: u64, value: T) {
        unsafe {
            write_cell(&self.value, value);
        }
        // Release: value construction happens-before any acquire load seeing `pos + 1`.
        self.sequence.store(pos.wrapping_add(1), Ordering::Release);
    }

    /// Moves the value out and rearms the slot with `next` sequence.
    ///
    /// # Safety
    ///
    /// The caller must own the value, i.e. have observed `sequence == pos + 1`
    /// and won the head counter for `pos`.
    #[inline(always)]
    pub unsafe fn consume(&self, next: u64) -> T {
        let value = unsafe { read_cell(&self.value) };
        // Release: the read is complete before a producer may overwrite the slot.
        self.sequence.store(next, Ordering::Release);
        value
    }

    /// Moves the value out without touching the sequence.
    ///
    /// # Safety
    ///
    /// Slot must hold a value and no other thread may access the slot.
    #[inline(always)]
    pub unsafe fn take(&self) -> T {
        unsafe { read_cell(&self.value) }
    }

    /// Stores value for position `pos` as readable without synchronization.
    ///
    /// # Safety
    ///
    /// Slot must be empty and no other thread may access the ring
    /// until it is published through a release store.
    #[inline(always)]
    pub unsafe fn restore(&self, pos: u64, value: T) {
        unsafe {
            write_cell(&self.value, value);
        }
        self.sequence.store(pos.wrapping_add(1), Ordering::Relaxed);
    }

    /// Drops the value in place.
    ///
    /// # Safety
    ///
    /// Slot must hold a value and no other thread may access the slot.
    /// The slot is left empty, its sequence must be rearmed by the caller.
    #[inline(always)]
    pub unsafe fn drop_value(&self) {
        unsafe { drop_cell(&self.value) }
    }

    #[inline(always)]
    pub fn rearm(&self, sequence: u64, order: Ordering) {
        self.sequence.store(sequence, order);
    }
}

/// Power-of-two sized array of slots allocated as one block.
pub(crate) struct SlotRing<T> {
    mask: u64,
    slots: Box<[Slot<T>]>,
}

impl<T> SlotRing<T> {
    /// Creates ring where every slot's sequence is its own index.
    ///
    /// Capacity is rounded up to the next power of two.
    #[cfg(test)]
    pub fn new(capacity: u64) -> Self {
        Self::with_base(capacity, 0)
    }

    /// Creates ring where each slot is writable for the position
    /// that maps to it in window `[base, base + capacity)`.
    ///
    /// Capacity is rounded up to the next power of two.
    /// Aborts the process if memory cannot be allocated.
    pub fn with_base(capacity: u64, base: u64) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let len = match usize::try_from(capacity) {
            Ok(len) => len,
            Err(_) => crate::alloc_failure(capacity),
        };

        let mut slots = Vec::new();
        if slots.try_reserve_exact(len).is_err() {
            crate::alloc_failure(capacity);
        }

        let mask = capacity - 1;
        // Slot `i` serves the only position in the window congruent to `i`.
        slots.extend((0..capacity).map(|i| {
            let offset = i.wrapping_sub(base) & mask;
            Slot::new(base.wrapping_add(offset))
        }));

        SlotRing {
            mask,
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Slot for logical position `pos`.
    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn slot_at(&self, pos: u64) -> &Slot<T> {
        // Index is masked below capacity which fits into `usize`.
        let idx = (pos & self.mask) as usize;
        debug_assert!(idx < self.slots.len());
        unsafe { self.slots.get_unchecked(idx) }
    }

    /// Drops values at positions `head..tail`.
    ///
    /// # Safety
    ///
    /// Exactly those positions must hold values and no other thread may access the ring.
    pub unsafe fn drop_range(&self, head: u64, tail: u64) {
        let mut pos = head;
        while pos != tail {
            unsafe {
                self.slot_at(pos).drop_value();
            }
            pos = pos.wrapping_add(1);
        }
    }
}
