//! A semaphore with a single permit used as a mutual exclusion lock.
//!
//! Run with: `cargo run --example semaphore_as_lock`.
#![expect(
    clippy::arithmetic_side_effects,
    reason = "this is example code that does not need production-level safety"
)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use latchkey::{Semaphore, Timeout};

fn main() {
    let semaphore = Arc::new(Semaphore::new(1));
    let shared = Arc::new(AtomicU64::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let workers = (0..10)
        .map(|_| {
            let semaphore = Arc::clone(&semaphore);
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);

            thread::spawn(move || {
                let mut private = 0_u64;

                while !stop.load(Ordering::Relaxed) {
                    assert!(semaphore.acquire(Timeout::Infinite));

                    let value = shared.load(Ordering::Relaxed);
                    shared.store(value + 1, Ordering::Relaxed);
                    private += 1;

                    semaphore.release(1);
                }

                private
            })
        })
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(500));
    stop.store(true, Ordering::Relaxed);

    let total: u64 = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker thread panicked"))
        .sum();

    println!("sum of private counters: {total}");
    println!("shared counter:          {}", shared.load(Ordering::Relaxed));
}
