//! End-to-end tests against a live driver thread.
//!
//! These assert wall-clock behavior, so delay bounds are generous: a timer
//! may legitimately land one tick late on the lattice, plus scheduling
//! jitter on a loaded CI machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use rand::Rng;
use serial_test::serial;

use kronos::{Wheel, WheelConfig, WheelShard};

fn init() {
    static ONCE: Once = Once::new();
    ONCE.call_once(kronos::init_tracing);
}

fn wheel_with_tick(tick: Duration) -> Wheel {
    init();
    Wheel::spawn(WheelConfig::new(tick)).unwrap()
}

#[test]
#[serial]
fn one_shot_fires_close_to_its_delay() {
    let wheel = wheel_with_tick(Duration::from_millis(1));
    let delay = Duration::from_millis(50);

    let start = Instant::now();
    let timer = wheel.after(delay);
    let _at = timer.recv().unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= delay - Duration::from_millis(2), "{elapsed:?}");
    assert!(elapsed < delay + Duration::from_millis(100), "{elapsed:?}");

    // Fired one-shot: cancellation reports failure, release succeeds.
    assert!(!timer.stop());
    timer.release();
    assert_eq!(wheel.timers(), 0);
    wheel.shutdown();
}

#[test]
#[serial]
fn reset_pushes_the_deadline_out() {
    let wheel = wheel_with_tick(Duration::from_millis(1));

    let start = Instant::now();
    let timer = wheel.after(Duration::from_millis(500));
    assert!(timer.reset(Duration::from_millis(40)));
    let _at = timer.recv().unwrap();
    let elapsed = start.elapsed();

    // Fired on the reset schedule, not the original one.
    assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    timer.release();
    wheel.shutdown();
}

#[test]
#[serial]
fn ticker_fires_repeatedly() {
    let wheel = wheel_with_tick(Duration::from_millis(1));
    let ticker = wheel.ticker(Duration::from_millis(20));

    let start = Instant::now();
    for _ in 0..5 {
        ticker.recv().unwrap();
    }
    let elapsed = start.elapsed();

    // Five periods of 20ms: cumulative drift stays bounded, it does not
    // grow with the firing count.
    assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
    assert!(ticker.stop());
    ticker.release();
    assert_eq!(wheel.timers(), 0);
    wheel.shutdown();
}

#[test]
#[serial]
fn ten_thousand_concurrent_timers_fire_exactly_once() {
    const N: usize = 10_000;
    const THREADS: usize = 8;
    const STOPPED: usize = 10;

    let wheel = Arc::new(wheel_with_tick(Duration::from_millis(10)));
    let fired = Arc::new(AtomicUsize::new(0));

    // Register from concurrent callers, like connection handlers would.
    let registrars: Vec<_> = (0..THREADS)
        .map(|_| {
            let wheel = Arc::clone(&wheel);
            let fired = Arc::clone(&fired);
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                (0..N / THREADS)
                    .map(|_| {
                        let fired = Arc::clone(&fired);
                        let delay = Duration::from_millis(rng.gen_range(500..800));
                        wheel.after_fn(delay, move |_| {
                            fired.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let handles: Vec<_> = registrars
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .collect();

    assert_eq!(wheel.timers(), N);
    assert_eq!(wheel.timers_in_buckets(), N);

    for h in handles.iter().take(STOPPED) {
        assert!(h.stop());
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while fired.load(Ordering::Relaxed) < N - STOPPED && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    // Settle: catch any spurious extra firing.
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(fired.load(Ordering::Relaxed), N - STOPPED);
    assert_eq!(wheel.timers(), 0);
    assert_eq!(wheel.timers_in_buckets(), 0);
    for h in handles.into_iter().skip(STOPPED) {
        h.release();
    }
    let wheel = Arc::try_unwrap(wheel).map_err(|_| ()).unwrap();
    wheel.shutdown();
}

#[test]
#[serial]
fn stopped_timers_do_not_fire() {
    let wheel = wheel_with_tick(Duration::from_millis(5));
    let fired = Arc::new(AtomicUsize::new(0));

    const N: usize = 100;
    const STOPPED: usize = 10;
    let handles: Vec<_> = (0..N)
        .map(|_| {
            let fired = Arc::clone(&fired);
            wheel.after_fn(Duration::from_millis(200), move |_| {
                fired.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    for h in handles.iter().take(STOPPED) {
        assert!(h.stop());
    }
    assert_eq!(wheel.timers(), N - STOPPED);

    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(fired.load(Ordering::Relaxed), N - STOPPED);
    wheel.shutdown();
}

#[test]
#[serial]
fn pool_recycles_entities_across_registrations() {
    let wheel = wheel_with_tick(Duration::from_millis(10));

    // Sequential schedule/stop/release churn reuses one entity.
    for _ in 0..50 {
        let h = wheel.after_fn(Duration::from_secs(60), |_| {});
        assert!(h.stop());
        h.release();
    }
    assert_eq!(wheel.pool_fresh_count(), 1);

    // Two live at once forces a second entity, no more.
    let a = wheel.after_fn(Duration::from_secs(60), |_| {});
    let b = wheel.after_fn(Duration::from_secs(60), |_| {});
    assert_eq!(wheel.pool_fresh_count(), 2);
    assert!(a.stop());
    assert!(b.stop());
    a.release();
    b.release();
    wheel.shutdown();
}

#[test]
#[serial]
fn periodic_callback_keeps_its_captured_state() {
    let wheel = wheel_with_tick(Duration::from_millis(1));
    let (tx, rx) = std::sync::mpsc::channel();

    let mut count = 0u32;
    let handle = wheel.tick_fn(Duration::from_millis(10), move |_| {
        count += 1;
        let _ = tx.send(count);
    });

    // The closure's state accumulates across firings.
    let mut last = 0;
    for _ in 0..4 {
        last = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }
    assert!(last >= 4);

    assert!(handle.stop());
    handle.release();
    wheel.shutdown();
}

#[test]
#[serial]
fn shard_spreads_and_fires_everywhere() {
    init();
    let shard = WheelShard::spawn(
        WheelConfig::new(Duration::from_millis(5)).with_name("shard-test"),
        4,
    )
    .unwrap();
    let fired = Arc::new(AtomicUsize::new(0));

    const N: usize = 200;
    let handles: Vec<_> = (0..N)
        .map(|i| {
            let fired = Arc::clone(&fired);
            shard.schedule_with_key(i as u64, Duration::from_millis(100), Duration::ZERO, move |_| {
                fired.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    assert_eq!(shard.timers(), N);

    let deadline = Instant::now() + Duration::from_secs(5);
    while fired.load(Ordering::Relaxed) < N && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(fired.load(Ordering::Relaxed), N);
    assert_eq!(shard.timers(), 0);

    for h in handles {
        h.release();
    }
    shard.shutdown();
}

#[test]
#[serial]
fn sub_tick_delay_fires_on_the_next_tick() {
    let wheel = wheel_with_tick(Duration::from_millis(20));

    let start = Instant::now();
    let timer = wheel.after(Duration::from_millis(1));
    let _at = timer.recv().unwrap();
    // Quantized to zero ticks: fires on the next tick, not immediately.
    assert!(start.elapsed() < Duration::from_millis(200));

    timer.release();
    wheel.shutdown();
}

#[test]
#[serial]
fn shutdown_abandons_pending_timers() {
    let wheel = wheel_with_tick(Duration::from_millis(5));
    let fired = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&fired);
    let _handle = wheel.after_fn(Duration::from_millis(500), move |_| {
        observed.fetch_add(1, Ordering::Relaxed);
    });
    let timer = wheel.after(Duration::from_millis(500));

    wheel.shutdown();
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(fired.load(Ordering::Relaxed), 0);

    // Abandoned, not cancelled: the channel stays open and empty, since
    // the sender lives on in the undelivered callback.
    assert!(matches!(
        timer.channel().try_recv(),
        Err(std::sync::mpsc::TryRecvError::Empty)
    ));
    assert!(timer.stop());
    timer.release();
}
