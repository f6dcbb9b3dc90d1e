//! Process-wide sliding-window rate limiter.
//!
//! At most `max_calls` admissions happen in any `window`. Callers queue on a
//! fair `tokio::sync::Mutex`, so admission follows arrival order: the waiter
//! at the head of the queue holds the lock while it sleeps for the oldest
//! admission to leave the window, and everyone behind it waits its turn.
//!
//! A caller that gives up (max wait elapsed, or its future is dropped) leaves
//! the queue without taking a slot.
//!
//! A 429 with `Retry-After` holds the limiter: nobody is admitted before the
//! hold ends. Holds and `reconfigure` wake the head waiter so it re-checks
//! at once instead of sleeping out a deadline computed from stale limits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use mlq_config::ReconciliationConfig;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::MarketplaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub max_calls: u32,
    pub window: Duration,
    pub max_wait: Duration,
}

impl RateLimits {
    pub fn from_config(cfg: &ReconciliationConfig) -> Self {
        Self {
            max_calls: cfg.rate_limit_max_calls,
            window: cfg.rate_limit_window(),
            max_wait: cfg.rate_limit_max_wait(),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    admitted: Mutex<VecDeque<Instant>>,
    max_calls: AtomicU32,
    window_ms: AtomicU64,
    max_wait_ms: AtomicU64,
    held_until: StdMutex<Option<Instant>>,
    changed: Notify,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        let limiter = Self {
            admitted: Mutex::new(VecDeque::new()),
            max_calls: AtomicU32::new(1),
            window_ms: AtomicU64::new(1),
            max_wait_ms: AtomicU64::new(0),
            held_until: StdMutex::new(None),
            changed: Notify::new(),
        };
        limiter.reconfigure(limits);
        limiter
    }

    /// Swap limits in place and wake the head waiter to re-check against them.
    /// Admissions already recorded stay in the window.
    pub fn reconfigure(&self, limits: RateLimits) {
        self.max_calls
            .store(limits.max_calls.max(1), Ordering::Relaxed);
        self.window_ms
            .store((limits.window.as_millis() as u64).max(1), Ordering::Relaxed);
        self.max_wait_ms
            .store(limits.max_wait.as_millis() as u64, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    // Holds only ever store an instant, so a poisoned lock is still usable.
    fn held(&self) -> MutexGuard<'_, Option<Instant>> {
        self.held_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit nobody for `wait`. An existing longer hold is kept.
    pub fn hold_for(&self, wait: Duration) {
        let until = Instant::now() + wait;
        {
            let mut held = self.held();
            if held.map_or(true, |h| h < until) {
                *held = Some(until);
            }
        }
        self.changed.notify_waiters();
    }

    /// End of the current provider hold, if one is still running.
    pub fn held_until(&self) -> Option<Instant> {
        self.held().filter(|h| *h > Instant::now())
    }

    pub fn limits(&self) -> RateLimits {
        RateLimits {
            max_calls: self.max_calls.load(Ordering::Relaxed),
            window: Duration::from_millis(self.window_ms.load(Ordering::Relaxed)),
            max_wait: Duration::from_millis(self.max_wait_ms.load(Ordering::Relaxed)),
        }
    }

    /// Wait for a slot. Fails with `RateLimitTimeout` after the configured max wait.
    pub async fn acquire(&self) -> Result<(), MarketplaceError> {
        let max_wait = self.limits().max_wait;
        let started = Instant::now();
        match tokio::time::timeout(max_wait, self.admit()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let waited = started.elapsed();
                debug!(waited_ms = waited.as_millis() as u64, "rate limiter wait exceeded");
                Err(MarketplaceError::RateLimitTimeout { waited })
            }
        }
    }

    /// Admissions recorded inside the current window.
    pub async fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock().await;
        Self::evict(&mut admitted, Instant::now(), self.limits().window);
        admitted.len()
    }

    fn evict(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = admitted.front() {
            if now.duration_since(*front) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    async fn admit(&self) {
        let mut admitted = self.admitted.lock().await;
        loop {
            // Registered before the limits are read so a concurrent change is never missed.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let RateLimits {
                max_calls, window, ..
            } = self.limits();
            let now = Instant::now();

            let wake_at = if let Some(until) = self.held_until() {
                until
            } else {
                Self::evict(&mut admitted, now, window);
                match admitted.front() {
                    Some(oldest) if admitted.len() >= max_calls as usize => *oldest + window,
                    _ => {
                        admitted.push_back(now);
                        return;
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = &mut changed => {
                    debug!("rate limits changed; re-checking");
                }
            }
        }
    }
}
