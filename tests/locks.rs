#![cfg(not(loom))]

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use comity::{AdaptiveMutex, BackoffConfig, Mutex};

const THREADS: u64 = 8;
const ITERATIONS: u64 = 10_000;

/// Read-modify-write split by a yield so that unsynchronized increments get lost.
fn racy_increment(counter: &AtomicU64) {
    let value = counter.load(Ordering::Relaxed);
    thread::yield_now();
    counter.store(value + 1, Ordering::Relaxed);
}

#[test]
fn mutex_counts_every_increment() {
    let counter = Arc::new(Mutex::new(0u64));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*counter.lock(), THREADS * ITERATIONS);
}

#[test]
fn raw_mutex_protects_racy_section() {
    let lock = Arc::new(AdaptiveMutex::new());
    let counter = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    lock.lock();
                    racy_increment(&counter);
                    lock.unlock();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), THREADS * 1000);
    assert!(!lock.is_locked());
}

/// Runs `racy_increment` from every thread without any lock and returns the final count.
fn unguarded_round() -> u64 {
    let counter = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..1000 {
                    racy_increment(&counter);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    counter.load(Ordering::Relaxed)
}

#[test]
fn unguarded_section_loses_updates() {
    // Without the mutex the same section must drop increments,
    // otherwise `raw_mutex_protects_racy_section` would prove nothing.
    let counts: Vec<u64> = (0..5).map(|_| unguarded_round()).collect();

    assert!(counts.iter().all(|&count| count <= THREADS * 1000));
    assert!(
        counts.iter().any(|&count| count < THREADS * 1000),
        "no lost updates in {counts:?}"
    );
}

#[test]
fn immediate_park_mutex_under_contention() {
    let lock = Arc::new(lock_api::Mutex::<AdaptiveMutex, u64>::from_raw(
        AdaptiveMutex::with_config(BackoffConfig::IMMEDIATE_PARK),
        0,
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = lock.lock();
                    *guard += 1;
                    if *guard % 100 == 0 {
                        thread::sleep(Duration::from_micros(50));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*lock.lock(), THREADS * 1000);
}

#[cfg(feature = "rwlock")]
mod rwlock {
    use super::*;
    use comity::{AdaptiveRwLock, RwLock};
    use lock_api::RawRwLock as _;

    #[test]
    fn readers_share_and_writers_exclude() {
        let lock = Arc::new(RwLock::new(()));
        let readers = Arc::new(AtomicUsize::new(0));
        let writers = Arc::new(AtomicUsize::new(0));
        let max_readers = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(6));

        let reader_handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let readers = readers.clone();
                let writers = writers.clone();
                let max_readers = max_readers.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..500 {
                        let _guard = lock.read();
                        let now = readers.fetch_add(1, Ordering::SeqCst) + 1;
                        max_readers.fetch_max(now, Ordering::SeqCst);
                        assert_eq!(writers.load(Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_micros(20));
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        let writer_handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = lock.clone();
                let readers = readers.clone();
                let writers = writers.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        let _guard = lock.write();
                        assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        writers.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in reader_handles.into_iter().chain(writer_handles) {
            handle.join().unwrap();
        }

        assert!(max_readers.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn concurrent_readers_overlap() {
        let lock = Arc::new(RwLock::new(0u32));
        let barrier = Arc::new(Barrier::new(2));

        let other = {
            let lock = lock.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let guard = lock.read();
                barrier.wait();
                barrier.wait();
                drop(guard);
            })
        };

        barrier.wait();
        // The other thread holds a read lock now.
        assert!(lock.try_read().is_some());
        barrier.wait();
        other.join().unwrap();
    }

    #[test]
    fn writer_is_not_starved_by_readers() {
        const READERS: usize = 4;

        let lock = Arc::new(RwLock::new(0u64));
        let stop = Arc::new(AtomicBool::new(false));
        let sections = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let lock = lock.clone();
                let stop = stop.clone();
                let sections = sections.clone();
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let guard = lock.read();
                        thread::sleep(Duration::from_micros(100));
                        drop(guard);
                        sections.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        // Let readers overlap continuously before the first writer arrives.
        while sections.load(Ordering::SeqCst) < READERS * 4 {
            thread::yield_now();
        }

        let mut worst = 0;
        for _ in 0..10 {
            let before = sections.load(Ordering::SeqCst);
            let mut guard = lock.write();
            let passed = sections.load(Ordering::SeqCst) - before;
            *guard += 1;
            drop(guard);

            worst = worst.max(passed);
            thread::sleep(Duration::from_millis(1));
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(*lock.read(), 10);

        // Sections already running when the writer asked, counter increments of
        // sections that ended just before it, and slack for a preempted writer.
        // A reader-preferring lock would never let the writer in at all.
        assert!(
            worst <= 4 * READERS,
            "{worst} reader sections passed a waiting writer"
        );
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        let lock = Arc::new(AdaptiveRwLock::new());
        lock.lock_shared();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.lock_exclusive();
                // Safety: acquired above.
                unsafe { lock.unlock_exclusive() };
            })
        };

        while !lock.has_pending_writer() {
            thread::yield_now();
        }
        assert!(!lock.try_lock_shared());

        // Safety: shared lock taken at the start.
        unsafe { lock.unlock_shared() };
        writer.join().unwrap();

        assert!(!lock.is_locked());
        assert!(lock.try_lock_shared());
        // Safety: acquired on the line above.
        unsafe { lock.unlock_shared() };
    }
}
