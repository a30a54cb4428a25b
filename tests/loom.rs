#![cfg(loom)]

use comity::{AdaptiveMutex, BackoffConfig};
use loom::{
    cell::UnsafeCell,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

#[test]
fn loom_mutex_exclusive() {
    loom::model(|| {
        let lock = Arc::new(AdaptiveMutex::with_config(BackoffConfig::IMMEDIATE_PARK));
        let data = Arc::new(UnsafeCell::new(0u32));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = lock.clone();
                let data = data.clone();
                thread::spawn(move || {
                    lock.lock();
                    data.with_mut(|ptr| unsafe { *ptr += 1 });
                    lock.unlock();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(data.with(|ptr| unsafe { *ptr }), 2);
    });
}

#[cfg(feature = "rwlock")]
#[test]
fn loom_rwlock_writer_excludes_reader() {
    use comity::AdaptiveRwLock;

    loom::model(|| {
        let lock = Arc::new(AdaptiveRwLock::with_config(BackoffConfig::IMMEDIATE_PARK));
        let data = Arc::new(UnsafeCell::new(0u32));

        let writer = {
            let lock = lock.clone();
            let data = data.clone();
            thread::spawn(move || {
                lock.write_lock();
                data.with_mut(|ptr| unsafe { *ptr = 1 });
                lock.write_unlock();
            })
        };

        lock.read_lock();
        let seen = data.with(|ptr| unsafe { *ptr });
        lock.read_unlock();
        assert!(seen == 0 || seen == 1);

        writer.join().unwrap();
        assert!(!lock.is_locked());
    });
}

#[cfg(feature = "queue")]
#[test]
fn loom_queue_push_pop() {
    use comity::{ConcurrentQueue, QueueConfig};

    loom::model(|| {
        let config = QueueConfig::with_capacity(2).backoff(BackoffConfig::IMMEDIATE_PARK);
        let queue = Arc::new(ConcurrentQueue::with_config(config).unwrap());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                queue.push(1u32);
                queue.push(2);
            })
        };

        let mut received = Vec::new();
        while received.len() < 2 {
            match queue.pop() {
                Some(value) => received.push(value),
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert_eq!(received, [1, 2]);
    });
}

#[cfg(feature = "queue")]
#[test]
fn loom_queue_grows_under_contention() {
    use comity::{ConcurrentQueue, QueueConfig};

    loom::model(|| {
        let config = QueueConfig::with_capacity(1).backoff(BackoffConfig::IMMEDIATE_PARK);
        let queue = Arc::new(ConcurrentQueue::with_config(config).unwrap());
        let popped = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..2u32)
            .map(|id| {
                let queue = queue.clone();
                thread::spawn(move || queue.push(id))
            })
            .collect();

        let consumer = {
            let queue = queue.clone();
            let popped = popped.clone();
            thread::spawn(move || {
                if queue.pop().is_some() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        consumer.join().unwrap();

        let mut rest = 0;
        while queue.pop().is_some() {
            rest += 1;
        }
        assert_eq!(popped.load(Ordering::Relaxed) + rest, 2);
    });
}
