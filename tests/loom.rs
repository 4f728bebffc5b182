#![allow(missing_docs)]
#![cfg(feature = "loom")]

use loom::{sync::Arc, thread};
use mtjd::{mt::Semaphore, queue::LockFreeFixedQueue};

type Queue = LockFreeFixedQueue<u32, 2>;

#[test]
fn loom_two_producers_one_consumer() {
    loom::model(|| {
        let queue = Arc::new(Queue::new());

        let producers: Vec<_> = [1, 2]
            .into_iter()
            .map(|value| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    queue.push_value(value, false).unwrap();
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            if let Some(value) = queue.pop_value(false) {
                seen.push(value);
            } else {
                thread::yield_now();
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, [1, 2]);
        assert!(queue.is_empty());
        assert_eq!(queue.allocated(), 0);
    });
}

#[test]
fn loom_blocked_pop_wakes_on_abort() {
    loom::model(|| {
        let queue = Arc::new(Queue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_value(true))
        };
        queue.abort();
        assert_eq!(consumer.join().unwrap(), None);
        // Second abort is a no-op.
        queue.abort();
        assert!(queue.is_aborted());
    });
}

#[test]
fn loom_last_slot_goes_to_exactly_one_producer() {
    loom::model(|| {
        let queue = Arc::new(Queue::new());
        queue.push_value(0, false).unwrap();

        let producers: Vec<_> = [1, 2]
            .into_iter()
            .map(|value| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.push_value(value, false).is_ok())
            })
            .collect();
        let accepted = producers
            .into_iter()
            .map(|producer| producer.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_value(false), Some(0));
    });
}

#[test]
fn loom_dealloc_makes_room_for_concurrent_alloc() {
    loom::model(|| {
        let queue = Arc::new(Queue::new());
        queue.push_value(1, false).unwrap();
        queue.push_value(2, false).unwrap();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_value(false))
        };
        let pushed = queue.push_value(3, false).is_ok();
        let popped = consumer.join().unwrap();

        assert_eq!(popped, Some(1));
        // Full until the consumer released its slot.
        assert!(queue.allocated() <= 2);
        if pushed {
            assert_eq!(queue.pop_value(false), Some(2));
            assert_eq!(queue.pop_value(false), Some(3));
        } else {
            assert_eq!(queue.len(), 1);
        }
    });
}

#[test]
fn loom_semaphore_signal_releases_waiter() {
    loom::model(|| {
        let semaphore = Arc::new(Semaphore::new(0, 1));
        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || semaphore.wait())
        };
        semaphore.signal();
        assert!(waiter.join().unwrap());
        assert_eq!(semaphore.count(), 0);
    });
}
