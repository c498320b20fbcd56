use blockring::{BlockingQueue, PopError, SpscQueue};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn tokens_track_elements() {
    let q = BlockingQueue::<i32, 16>::new();
    assert_eq!(q.try_dequeue(), Err(PopError));

    q.enqueue(1).unwrap();
    q.enqueue(2).unwrap();
    assert_eq!(q.size_approx(), 2);

    assert_eq!(q.peek(), Some(&1));
    assert_eq!(q.size_approx(), 2);

    q.discard().unwrap();
    assert_eq!(q.try_dequeue(), Ok(2));
    assert_eq!(q.try_dequeue(), Err(PopError));
    assert_eq!(q.size_approx(), 0);
}

#[test]
fn growth_works_through_the_wrapper() {
    let q = BlockingQueue::<i32, 4>::with_capacity(2);
    for i in 1..=3 {
        q.try_enqueue(i).unwrap();
    }
    assert!(q.try_enqueue(4).is_err());

    for i in 4..=10 {
        q.enqueue(i).unwrap();
    }
    assert!(q.max_capacity() >= 10);
    for expected in 1..=10 {
        assert_eq!(q.try_dequeue(), Ok(expected));
    }
}

#[test]
fn wait_dequeue_blocks_until_an_element_arrives() {
    let q = Arc::new(BlockingQueue::<u64, 32>::new());

    let consumer = {
        let q = q.clone();
        thread::spawn(move || q.wait_dequeue())
    };

    thread::sleep(Duration::from_millis(20));
    q.enqueue(99).unwrap();
    assert_eq!(consumer.join().unwrap(), 99);
}

#[test]
fn timed_dequeue_times_out_on_empty() {
    let q = BlockingQueue::<i32, 32>::new();

    let start = Instant::now();
    assert_eq!(q.wait_dequeue_timed(Duration::from_millis(10)), Err(PopError));
    assert!(start.elapsed() >= Duration::from_millis(10));

    q.enqueue(5).unwrap();
    assert_eq!(q.wait_dequeue_timed(Duration::from_millis(10)), Ok(5));
}

#[test]
fn spsc_fifo_with_a_sleeping_consumer() {
    const ITEMS: usize = 50_000;
    let q = Arc::new(BlockingQueue::<usize, 64>::with_capacity(16));

    let producer = {
        let q = q.clone();
        thread::spawn(move || {
            for i in 0..ITEMS {
                q.enqueue(i).unwrap();
            }
        })
    };

    let consumer = {
        let q = q.clone();
        thread::spawn(move || {
            for expected in 0..ITEMS {
                assert_eq!(q.wait_dequeue(), expected);
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
    assert_eq!(q.size_approx(), 0);
}

#[test]
fn trait_surface_uses_the_allocating_enqueue() {
    let q = BlockingQueue::<u32, 8>::with_capacity(2);
    for i in 0..20 {
        q.push(i).unwrap();
    }
    assert_eq!(SpscQueue::size_approx(&q), 20);
    for expected in 0..20 {
        assert_eq!(q.pop(), Ok(expected));
    }
}
