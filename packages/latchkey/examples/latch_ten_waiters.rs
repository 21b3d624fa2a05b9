//! Ten threads block on a latch until the main thread opens it.
//!
//! Run with: `cargo run --example latch_ten_waiters`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use latchkey::{BooleanLatch, Timeout};

fn main() {
    let latch = Arc::new(BooleanLatch::new());
    let started = Instant::now();

    let workers = (0..10)
        .map(|index| {
            let latch = Arc::clone(&latch);
            thread::spawn(move || {
                let opened = latch.wait(Timeout::Infinite);
                println!("worker {index} released (opened: {opened})");
            })
        })
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(100));

    println!("opening latch after {:?}", started.elapsed());
    latch.open();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    // An async wait with a timeout on a latch that is already open completes immediately.
    let wait = latch.wait_async(Duration::from_millis(100));
    println!("late wait completed: {}", wait.is_completed());
}
