//! End-to-end scenarios exercising the primitives from several threads at once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use delayer::ManualTimer;
use futures::executor::block_on;
use latchkey::{
    BooleanLatch, CancellationToken, Error, ManualResetEvent, Outcome, Semaphore, Timeout,
};
use testing::{assert_elapsed_near, wait_until, with_watchdog};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg_attr(miri, ignore)]
#[test]
fn latch_releases_ten_blocked_threads() {
    with_watchdog(|| {
        let latch = Arc::new(BooleanLatch::new());

        let waiters = (0..10)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait(Timeout::Infinite))
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(100));
        latch.open();

        let opened = Instant::now();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }

        assert!(opened.elapsed() < SETTLE_TIMEOUT);
        assert!(latch.is_open());
        assert_eq!(latch.waiter_count(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn async_wait_times_out_and_leaves_registry() {
    with_watchdog(|| {
        let latch = BooleanLatch::new();

        let started = Instant::now();
        let wait = latch.wait_async(Duration::from_millis(100));
        assert_eq!(latch.waiter_count(), 1);

        assert_eq!(block_on(wait), Ok(false));

        assert_elapsed_near(
            started.elapsed(),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert_eq!(latch.waiter_count(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn semaphore_with_one_permit_excludes_mutually() {
    with_watchdog(|| {
        const THREADS: usize = 10;
        const RUN_TIME: Duration = Duration::from_millis(200);

        let semaphore = Arc::new(Semaphore::new(1));
        let shared = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..THREADS)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                let shared = Arc::clone(&shared);
                let stop = Arc::clone(&stop);

                thread::spawn(move || {
                    let mut private = 0_u64;

                    while !stop.load(Ordering::Relaxed) {
                        if !semaphore.acquire(Duration::from_millis(10)) {
                            continue;
                        }

                        // Separate load and store: without mutual exclusion, increments
                        // would get lost and the totals would disagree.
                        let value = shared.load(Ordering::Relaxed);
                        shared.store(value.wrapping_add(1), Ordering::Relaxed);
                        private = private.wrapping_add(1);

                        semaphore.release(1);
                    }

                    private
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(RUN_TIME);
        stop.store(true, Ordering::Relaxed);

        let total = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .fold(0_u64, u64::wrapping_add);

        assert_eq!(total, shared.load(Ordering::Relaxed));
        assert!(total > 0);
        assert_eq!(semaphore.available_permits(), 1);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn event_set_then_reset_releases_only_blocked_threads() {
    with_watchdog(|| {
        let event = Arc::new(ManualResetEvent::new(false));

        let waiters = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait(Timeout::Infinite))
            })
            .collect::<Vec<_>>();

        assert!(wait_until(SETTLE_TIMEOUT, || event.waiter_count() == 4));

        event.set();
        event.reset();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }

        assert!(!event.is_set());
        assert!(!event.wait(Duration::from_millis(20)));
    });
}

#[test]
fn cancel_before_timeout_resolves_cancelled_and_disarms_timer() {
    let timer = Arc::new(ManualTimer::new());
    let latch = BooleanLatch::builder().timer(Arc::clone(&timer)).build();

    let wait = latch.wait_async(Duration::from_millis(50));
    assert_eq!(timer.pending_count(), 1);

    timer.advance(Duration::from_millis(10));
    assert_eq!(latch.try_cancel(&wait), Ok(true));

    assert_eq!(wait.outcome(), Outcome::Cancelled);
    assert_eq!(timer.pending_count(), 0);

    // Well past the deadline, nothing fires and nothing changes.
    timer.advance(Duration::from_millis(100));
    assert_eq!(wait.outcome(), Outcome::Cancelled);
    assert_eq!(block_on(wait), Err(Error::Cancelled));
}

#[cfg_attr(miri, ignore)]
#[test]
fn cancel_token_from_other_thread_beats_real_timer() {
    with_watchdog(|| {
        let latch = BooleanLatch::new();
        let token = CancellationToken::new();

        let wait = latch.wait_async_with_cancel(Duration::from_secs(1), &token);

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                token.cancel();
            })
        };

        assert_eq!(block_on(wait.clone()), Err(Error::Cancelled));
        canceller.join().unwrap();

        assert_eq!(wait.outcome(), Outcome::Cancelled);
        assert_eq!(latch.waiter_count(), 0);
    });
}

#[test]
fn zero_timeout_waits_never_register() {
    let latch = BooleanLatch::new();
    let semaphore = Semaphore::new(0);
    let event = ManualResetEvent::new(false);

    assert!(!latch.wait(Timeout::ZERO));
    assert_eq!(latch.wait_async(Timeout::ZERO).outcome(), Outcome::TimedOut);
    assert_eq!(latch.waiter_count(), 0);

    assert!(!semaphore.acquire(Timeout::ZERO));
    assert_eq!(semaphore.waiter_count(), 0);

    assert!(!event.wait(Timeout::ZERO));
    assert_eq!(event.waiter_count(), 0);
}

#[cfg_attr(miri, ignore)]
#[test]
fn open_concurrent_with_new_waits_satisfies_all() {
    with_watchdog(|| {
        const THREADS: usize = 8;

        let latch = Arc::new(BooleanLatch::new());
        let barrier = Arc::new(Barrier::new(THREADS + 1));

        let waiters = (0..THREADS)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..50)
                        .map(|_| latch.wait_async(Timeout::Infinite))
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        barrier.wait();
        latch.open();

        for waiter in waiters {
            for wait in waiter.join().unwrap() {
                assert_eq!(wait.wait(), Ok(true));
            }
        }

        assert_eq!(latch.waiter_count(), 0);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn semaphores_hand_items_through_bounded_buffer() {
    with_watchdog(|| {
        const CONSUMERS: usize = 4;
        const ITEMS_PER_CONSUMER: u64 = 250;
        const ITEMS: u64 = 1000;
        const CAPACITY: usize = 8;

        let free_slots = Arc::new(Semaphore::new(CAPACITY));
        let items = Arc::new(Semaphore::new(0));
        let consumed = Arc::new(AtomicU64::new(0));

        let consumers = (0..CONSUMERS)
            .map(|_| {
                let free_slots = Arc::clone(&free_slots);
                let items = Arc::clone(&items);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    for _ in 0..ITEMS_PER_CONSUMER {
                        assert!(items.acquire(Timeout::Infinite));
                        consumed.fetch_add(1, Ordering::Relaxed);
                        free_slots.release(1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..ITEMS {
            assert!(free_slots.acquire(Timeout::Infinite));
            items.release(1);
        }

        for consumer in consumers {
            consumer.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::Relaxed), ITEMS);
        assert_eq!(items.available_permits(), 0);
        assert_eq!(free_slots.available_permits(), CAPACITY);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn bulk_release_wakes_several_acquirers() {
    with_watchdog(|| {
        const ACQUIRERS: usize = 6;

        let semaphore = Arc::new(Semaphore::new(0));

        let acquirers = (0..ACQUIRERS)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                thread::spawn(move || semaphore.acquire(Timeout::Infinite))
            })
            .collect::<Vec<_>>();

        assert!(wait_until(SETTLE_TIMEOUT, || {
            semaphore.waiter_count() == ACQUIRERS
        }));

        semaphore.release(2);
        semaphore.release(ACQUIRERS.saturating_sub(2));

        for acquirer in acquirers {
            assert!(acquirer.join().unwrap());
        }

        assert_eq!(semaphore.available_permits(), 0);
    });
}
