//! `reconcile` section: thresholds for the reconciliation loop.
//!
//! Every numeric threshold is configuration. Defaults are documented on
//! [`ReconciliationConfig::default`]; the JSON/YAML field names are camelCase
//! because the same shape is accepted by the admin config endpoint.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mlq_schemas::QuestionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON pointer of the section inside the layered config.
pub const RECONCILE_POINTER: &str = "/reconcile";

/// Exponential backoff for transient marketplace failures within one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RetryBackoff {
    pub base_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 8_000,
            factor: 2.0,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ReconciliationConfig {
    /// Questions younger than this are left to the answer pipeline.
    pub min_age_before_check_ms: u64,
    pub stale_statuses: BTreeSet<QuestionStatus>,
    /// Attempt ceiling; reaching it flags the question for manual review.
    pub max_attempts_before_give_up: u32,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_calls: u32,
    /// Longest a caller may queue on the limiter before `RateLimitTimeout`.
    pub rate_limit_max_wait_ms: u64,
    pub per_call_timeout_ms: u64,
    pub retry_backoff: RetryBackoff,
    pub schedule_interval_ms: u64,
    pub max_questions_per_run: usize,
    /// Pause before re-trying questions the provider throttled (HTTP 429).
    pub rate_limited_requeue_delay_ms: u64,
}

impl Default for ReconciliationConfig {
    /// Defaults: 2 min minimum age, `{ERROR, PROCESSING}` stale, 5 attempts,
    /// 300 calls per 60 s window, 30 s max limiter wait, 10 s per call,
    /// backoff 500 ms doubling to 8 s over 3 attempts, a run every 5 min,
    /// 500 questions per run, 2 s re-queue pause after a 429.
    fn default() -> Self {
        Self {
            min_age_before_check_ms: 120_000,
            stale_statuses: [QuestionStatus::Error, QuestionStatus::Processing]
                .into_iter()
                .collect(),
            max_attempts_before_give_up: 5,
            rate_limit_window_ms: 60_000,
            rate_limit_max_calls: 300,
            rate_limit_max_wait_ms: 30_000,
            per_call_timeout_ms: 10_000,
            retry_backoff: RetryBackoff::default(),
            schedule_interval_ms: 300_000,
            max_questions_per_run: 500,
            rate_limited_requeue_delay_ms: 2_000,
        }
    }
}

impl ReconciliationConfig {
    /// Read and validate the `reconcile` section. Absent section → defaults.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let cfg = match config_json.pointer(RECONCILE_POINTER) {
            None | Some(Value::Null) => Self::default(),
            Some(section) => serde_json::from_value(section.clone())
                .context("CONFIG_INVALID section=/reconcile: does not match schema")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stale_statuses.is_empty() {
            bail!("CONFIG_INVALID field=staleStatuses: must name at least one status");
        }
        if let Some(settled) = self.stale_statuses.iter().find(|s| s.is_settled()) {
            bail!(
                "CONFIG_INVALID field=staleStatuses: {} is settled and may never be reconciled",
                settled
            );
        }
        if self.max_attempts_before_give_up == 0 {
            bail!("CONFIG_INVALID field=maxAttemptsBeforeGiveUp: must be >= 1");
        }
        if self.rate_limit_window_ms == 0 {
            bail!("CONFIG_INVALID field=rateLimitWindowMs: must be > 0");
        }
        if self.rate_limit_max_calls == 0 {
            bail!("CONFIG_INVALID field=rateLimitMaxCalls: must be >= 1");
        }
        if self.per_call_timeout_ms == 0 {
            bail!("CONFIG_INVALID field=perCallTimeoutMs: must be > 0");
        }
        if self.schedule_interval_ms == 0 {
            bail!("CONFIG_INVALID field=scheduleIntervalMs: must be > 0");
        }
        if self.max_questions_per_run == 0 {
            bail!("CONFIG_INVALID field=maxQuestionsPerRun: must be >= 1");
        }

        let b = &self.retry_backoff;
        if b.max_attempts == 0 {
            bail!("CONFIG_INVALID field=retryBackoff.maxAttempts: must be >= 1");
        }
        if b.base_ms == 0 {
            bail!("CONFIG_INVALID field=retryBackoff.baseMs: must be > 0");
        }
        if b.max_ms < b.base_ms {
            bail!(
                "CONFIG_INVALID field=retryBackoff.maxMs: {} is below baseMs {}",
                b.max_ms,
                b.base_ms
            );
        }
        if !b.factor.is_finite() || b.factor < 1.0 {
            bail!("CONFIG_INVALID field=retryBackoff.factor: must be finite and >= 1.0");
        }
        Ok(())
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_before_check_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_max_wait_ms)
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn rate_limited_requeue_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limited_requeue_delay_ms)
    }
}
