//! Threads blocked on a manual-reset event are released by a `set()` even when a `reset()`
//! follows immediately, while later waits block again.
//!
//! Run with: `cargo run --example event_set_then_reset`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use latchkey::{ManualResetEvent, Timeout};

fn main() {
    let event = Arc::new(ManualResetEvent::new(false));

    let waiters = (0..3)
        .map(|index| {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                let signaled = event.wait(Timeout::Infinite);
                println!("waiter {index} released (signaled: {signaled})");
            })
        })
        .collect::<Vec<_>>();

    while event.waiter_count() < 3 {
        thread::sleep(Duration::from_millis(1));
    }

    event.set();
    event.reset();

    for waiter in waiters {
        waiter.join().expect("waiter thread panicked");
    }

    let late = event.wait(Duration::from_millis(50));
    println!("wait after reset signaled: {late}");
}
