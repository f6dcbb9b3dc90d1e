//! Scenario: rate limiter fairness
//!
//! # Invariants under test
//!
//! 1. Concurrent callers are admitted in arrival order.
//! 2. No window of `window` length ever contains more than `max_calls`
//!    admissions.
//! 3. A waiter that times out does not delay or reorder the ones behind it.
//! 4. Raising capacity wakes a waiter parked on the old window at once.
//! 5. A provider hold keeps everyone out until it ends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mlq_marketplace::{MarketplaceError, RateLimiter, RateLimits};
use tokio::time::Instant;

fn limiter(max_calls: u32, window_ms: u64, max_wait_ms: u64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimits {
        max_calls,
        window: Duration::from_millis(window_ms),
        max_wait: Duration::from_millis(max_wait_ms),
    }))
}

/// Let freshly spawned tasks run up to their first suspension point.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_arrival_order_and_window_bound() {
    let l = limiter(2, 1_000, 60_000);
    let admitted: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let t0 = Instant::now();

    let mut handles = Vec::new();
    for i in 0..7 {
        let l = l.clone();
        let admitted = admitted.clone();
        handles.push(tokio::spawn(async move {
            l.acquire().await.unwrap();
            admitted.lock().unwrap().push((i, Instant::now()));
        }));
        settle().await;
    }
    for h in handles {
        h.await.unwrap();
    }

    let admitted = admitted.lock().unwrap().clone();
    let order: Vec<usize> = admitted.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, (0..7).collect::<Vec<_>>());

    let offsets: Vec<u64> = admitted
        .iter()
        .map(|(_, t)| (*t - t0).as_millis() as u64)
        .collect();
    assert_eq!(offsets, vec![0, 0, 1_000, 1_000, 2_000, 2_000, 3_000]);

    for pair in admitted.windows(3) {
        assert!(
            pair[2].1 - pair[0].1 >= Duration::from_millis(1_000),
            "three admissions inside one window: {offsets:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_timed_out_waiter_does_not_block_the_queue() {
    let l = limiter(1, 1_000, 1_500);
    l.acquire().await.unwrap();

    // Waiter A gets the next slot at +1000; waiter B would need +2000 and its
    // max wait is 1500, so it times out. C arrives at +1600 and gets +2000.
    let a = {
        let l = l.clone();
        tokio::spawn(async move { l.acquire().await.map(|_| Instant::now()) })
    };
    settle().await;
    let b = {
        let l = l.clone();
        tokio::spawn(async move { l.acquire().await.map(|_| Instant::now()) })
    };
    settle().await;

    let t0 = Instant::now();
    let a_at = a.await.unwrap().unwrap();
    assert_eq!(a_at - t0, Duration::from_millis(1_000));

    let b_res = b.await.unwrap();
    assert!(matches!(
        b_res,
        Err(MarketplaceError::RateLimitTimeout { .. })
    ));

    tokio::time::sleep_until(t0 + Duration::from_millis(1_600)).await;
    l.acquire().await.unwrap();
    assert_eq!(Instant::now() - t0, Duration::from_millis(2_000));
}

// ---------------------------------------------------------------------------
// Live limits and provider holds
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scenario_reconfigure_wakes_parked_waiter() {
    let l = limiter(1, 60_000, 120_000);
    let t0 = Instant::now();
    l.acquire().await.unwrap();

    let waiter = {
        let l = l.clone();
        tokio::spawn(async move {
            l.acquire().await.unwrap();
            Instant::now()
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    l.reconfigure(RateLimits {
        max_calls: 2,
        window: Duration::from_secs(60),
        max_wait: Duration::from_secs(120),
    });

    // 4)
    let admitted_at = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter still parked on the old window")
        .unwrap();
    assert_eq!(admitted_at - t0, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn scenario_hold_delays_every_caller() {
    let l = limiter(1, 1_000, 120_000);
    let t0 = Instant::now();
    l.acquire().await.unwrap();

    // Parked until t0 + 1s, then the hold moves its deadline out.
    let waiter = {
        let l = l.clone();
        tokio::spawn(async move {
            l.acquire().await.unwrap();
            Instant::now()
        })
    };
    settle().await;
    l.hold_for(Duration::from_secs(60));

    // 5)
    let admitted_at = waiter.await.unwrap();
    assert_eq!(admitted_at - t0, Duration::from_secs(60));
    assert_eq!(l.held_until(), None);
}
