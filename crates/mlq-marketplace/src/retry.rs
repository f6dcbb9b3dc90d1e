//! Retry policy for one marketplace call.
//!
//! Only transient failures are retried here. Credential failures have their
//! own refresh-once path in the adapter; 404 and 429 go straight back to the
//! engine, which owns what happens next.

use std::time::Duration;

use mlq_config::RetryBackoff;

use crate::{MarketplaceError, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_backoff(&RetryBackoff::default())
    }
}

impl RetryPolicy {
    pub fn from_backoff(b: &RetryBackoff) -> Self {
        Self {
            base: Duration::from_millis(b.base_ms),
            max: Duration::from_millis(b.max_ms),
            factor: b.factor,
            max_attempts: b.max_attempts.max(1),
        }
    }

    /// Delay after the `attempt`-th failure (1-based): `base * factor^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let ms = self.base.as_millis() as f64 * self.factor.powi(exp);
        let capped = ms.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// `attempt` is the number of attempts already made, the failed one included.
    pub fn decide(&self, err: &MarketplaceError, attempt: u32) -> RetryDecision {
        let retryable = matches!(
            err,
            MarketplaceError::Transient { .. } | MarketplaceError::Token(TokenError::Transport(_))
        );
        if retryable && attempt < self.max_attempts {
            RetryDecision::RetryAfter(self.delay_for(attempt))
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_millis(3_000),
            factor: 2.0,
            max_attempts: 10,
        };
        let delays: Vec<u64> = (1..=5).map(|a| p.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
    }

    #[test]
    fn only_transient_errors_are_retried_within_budget() {
        let p = RetryPolicy::default();
        let t = MarketplaceError::transient("502");
        assert_eq!(p.decide(&t, 1), RetryDecision::RetryAfter(Duration::from_millis(500)));
        assert_eq!(p.decide(&t, 2), RetryDecision::RetryAfter(Duration::from_millis(1_000)));
        assert_eq!(p.decide(&t, 3), RetryDecision::GiveUp);

        for e in [
            MarketplaceError::NotFound,
            MarketplaceError::RateLimited { retry_after: None },
            MarketplaceError::Unauthorized {
                reauth_required: false,
            },
            MarketplaceError::RateLimitTimeout {
                waited: Duration::from_secs(1),
            },
        ] {
            assert_eq!(p.decide(&e, 1), RetryDecision::GiveUp, "{e}");
        }
    }
}
