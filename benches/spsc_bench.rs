// Single-producer single-consumer throughput of the three queue shapes,
// with crossbeam-channel and std's sync_channel as baselines.

use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crossbeam_channel::bounded;

use blockring::{BlockQueue, BlockingQueue, CircularQueue};

const MESSAGES: usize = 100_000;
const CAPACITY: usize = 1024;

fn bench_1p_1c(c: &mut Criterion) {
    let mut group = c.benchmark_group("1p_1c");
    group.throughput(Throughput::Elements(MESSAGES as u64));

    group.bench_function("block_queue/spin", |b| {
        b.iter(|| {
            let q = Arc::new(BlockQueue::<usize, 512>::with_capacity(CAPACITY));
            let p = q.clone();

            let producer = thread::spawn(move || {
                for i in 0..MESSAGES {
                    while p.try_enqueue(black_box(i)).is_err() {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut got = 0;
            while got < MESSAGES {
                if q.try_dequeue().is_ok() {
                    got += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
            producer.join().unwrap();
        });
    });

    group.bench_function("blocking_queue/wait_dequeue", |b| {
        b.iter(|| {
            let q = Arc::new(BlockingQueue::<usize, 512>::with_capacity(CAPACITY));
            let p = q.clone();

            let producer = thread::spawn(move || {
                for i in 0..MESSAGES {
                    while p.try_enqueue(black_box(i)).is_err() {
                        std::hint::spin_loop();
                    }
                }
            });

            for _ in 0..MESSAGES {
                let _ = q.wait_dequeue();
            }
            producer.join().unwrap();
        });
    });

    group.bench_function("circular_queue/wait_ops", |b| {
        b.iter(|| {
            let q = Arc::new(CircularQueue::<usize>::with_capacity(CAPACITY));
            let p = q.clone();

            let producer = thread::spawn(move || {
                for i in 0..MESSAGES {
                    p.wait_enqueue(black_box(i));
                }
            });

            for _ in 0..MESSAGES {
                let _ = q.wait_dequeue();
            }
            producer.join().unwrap();
        });
    });

    group.bench_function("crossbeam_channel", |b| {
        b.iter(|| {
            let (tx, rx) = bounded::<usize>(CAPACITY);

            let producer = thread::spawn(move || {
                for i in 0..MESSAGES {
                    tx.send(black_box(i)).unwrap();
                }
            });

            for _ in 0..MESSAGES {
                let _ = rx.recv().unwrap();
            }
            producer.join().unwrap();
        });
    });

    group.bench_function("std_sync_channel", |b| {
        b.iter(|| {
            let (tx, rx) = sync_channel::<usize>(CAPACITY);

            let producer = thread::spawn(move || {
                for i in 0..MESSAGES {
                    tx.send(black_box(i)).unwrap();
                }
            });

            for _ in 0..MESSAGES {
                let _ = rx.recv().unwrap();
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_1p_1c);
criterion_main!(benches);
