use ringcast::{Config, PublishError, RingBuffer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_fifo_ordering_single_producer() {
    let ring = RingBuffer::<u64>::new(Config::new(1024, 1, false));
    let consumer = ring.consumer(0).unwrap();

    const N: u64 = 10_000;

    let producer = ring.clone();
    let handle = thread::spawn(move || {
        for i in 0..N {
            producer.publish(i).unwrap();
        }
    });

    let mut expected = 0;
    while expected < N {
        consumer.consume_all(|_, item| {
            assert_eq!(*item, expected, "FIFO violation: expected {}, got {}", expected, item);
            expected += 1;
        });
    }

    handle.join().unwrap();
    assert_eq!(expected, N);
}

#[test]
fn test_blocking_multi_producer_no_loss() {
    const N_PRODUCERS: usize = 8;
    const ITEMS_PER_PRODUCER: u64 = 5_000;

    // Small ring so producers block constantly
    let ring = RingBuffer::<(usize, u64)>::new(Config::new(64, 1, true));
    let consumer = ring.consumer(0).unwrap();

    let mut handles = vec![];
    for producer_id in 0..N_PRODUCERS {
        let ring = ring.clone();
        handles.push(thread::spawn(move || {
            for i in 0..ITEMS_PER_PRODUCER {
                ring.publish((producer_id, i)).unwrap();
            }
        }));
    }

    let total = N_PRODUCERS as u64 * ITEMS_PER_PRODUCER;
    let mut last_seen = vec![0u64; N_PRODUCERS];
    let mut received = 0u64;
    while received < total {
        received += consumer.consume_all(|_, (producer_id, value)| {
            assert_eq!(
                *value, last_seen[*producer_id],
                "FIFO violation for producer {}: expected {}, got {}",
                producer_id, last_seen[*producer_id], value
            );
            last_seen[*producer_id] += 1;
        }) as u64;
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(received, total);
    assert!(last_seen.iter().all(|&n| n == ITEMS_PER_PRODUCER));
    assert_eq!(ring.metrics().published, total);
}

#[test]
fn test_multicast_consumers_see_same_order() {
    const N_PRODUCERS: usize = 4;
    const ITEMS_PER_PRODUCER: u64 = 2_000;
    const CONSUMERS: usize = 3;

    let ring = RingBuffer::<(usize, u64)>::new(Config::new(128, CONSUMERS, false));
    let done = Arc::new(AtomicBool::new(false));

    let mut consumer_handles = vec![];
    for id in 0..CONSUMERS {
        let consumer = ring.consumer(id).unwrap();
        let done = Arc::clone(&done);
        consumer_handles.push(thread::spawn(move || {
            let mut order = Vec::new();
            loop {
                let n = consumer.consume_all(|seq, item| order.push((seq, *item)));
                if n == 0 {
                    if done.load(Ordering::Acquire) && consumer.is_drained() {
                        break;
                    }
                    thread::yield_now();
                }
            }
            order
        }));
    }

    let mut producer_handles = vec![];
    for producer_id in 0..N_PRODUCERS {
        let ring = ring.clone();
        producer_handles.push(thread::spawn(move || {
            for i in 0..ITEMS_PER_PRODUCER {
                ring.publish((producer_id, i)).unwrap();
            }
        }));
    }
    for handle in producer_handles {
        handle.join().unwrap();
    }
    ring.close();
    done.store(true, Ordering::Release);

    let orders: Vec<_> = consumer_handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let total = N_PRODUCERS * ITEMS_PER_PRODUCER as usize;
    for order in &orders {
        assert_eq!(order.len(), total);
        let unique: HashSet<_> = order.iter().map(|(_, item)| *item).collect();
        assert_eq!(unique.len(), total, "duplicate delivery");
        // Sequence numbers are contiguous from zero
        assert!(order.iter().enumerate().all(|(i, (seq, _))| *seq == i as u64));
    }
    // Global publish order is identical for every consumer
    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[1], orders[2]);
}

#[test]
fn test_try_publish_saturation_without_consumer_progress() {
    let ring = RingBuffer::<u32>::new(Config::new(16, 1, true));
    let _consumer = ring.consumer(0).unwrap();

    let mut accepted = 0;
    let mut rejected = 0;
    for i in 0..100 {
        match ring.try_publish(i) {
            Ok(()) => accepted += 1,
            Err(PublishError::Full) => rejected += 1,
            Err(PublishError::Closed) => unreachable!(),
        }
    }

    assert_eq!(accepted, 16);
    assert_eq!(rejected, 84);
    assert_eq!(ring.metrics().rejected, 84);
}
