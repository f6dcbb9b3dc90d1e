//! Reconciliation engine: load, select, fetch, classify, persist, notify.
//!
//! One run walks the eligible questions account by account, oldest first.
//! Every per-question failure is contained in that question's result; only a
//! failure to load candidates aborts the run.
//!
//! A provider 429 pauses the rest of the run for the longer of its
//! `Retry-After` and `rateLimitedRequeueDelayMs`; throttled questions get one
//! more try once that pause is over.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mlq_config::ReconciliationConfig;
use mlq_db::QuestionStore;
use mlq_marketplace::{MarketplaceAdapter, RateLimits};
use mlq_reconcile::{
    classify, select_eligible, EligibilityCriteria, FailureKind, IneligibleReason, RemoteOutcome,
};
use mlq_schemas::{
    CandidateQuestion, Question, QuestionStatus, QuestionUpdateEvent, ReconcileAction,
    ReconcileScope, ReconciliationResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::inflight::InFlightSet;
use crate::sink::QuestionEventSink;
use crate::stats::{ActionCounts, ReconciliationStats, RunOutcome, StatsAggregator};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("question {0} not found")]
    QuestionNotFound(Uuid),
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("invalid reconciliation config: {0}")]
    InvalidConfig(String),
}

/// What one trigger call returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResponse {
    pub run_id: Uuid,
    pub scope: ReconcileScope,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: chrono::DateTime<Utc>,
    pub duration_ms: u64,
    pub counts: ActionCounts,
    pub results: Vec<ReconciliationResult>,
    /// Selected questions abandoned because the run was cancelled.
    pub unprocessed: usize,
    pub cancelled: bool,
}

struct Step {
    result: ReconciliationResult,
    /// Row as it reads after this step, when the write landed.
    updated: Option<Question>,
    reauth: bool,
    rate_limit_timeout: bool,
    /// Provider `Retry-After` on a throttled step.
    retry_after: Option<Duration>,
}

impl Step {
    fn skipped(q: &Question, reason: impl Into<String>) -> Self {
        Step {
            result: ReconciliationResult::skipped(q.id, q.account_id, reason, Utc::now()),
            updated: None,
            reauth: false,
            rate_limit_timeout: false,
            retry_after: None,
        }
    }
}

/// Sleep until `until` unless a stop signal fires first. `false` on stop.
async fn pause_until(
    until: Instant,
    stop: &CancellationToken,
    cancel: &CancellationToken,
) -> bool {
    if until <= Instant::now() {
        return true;
    }
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(until) => true,
    }
}

pub fn eligibility_criteria(cfg: &ReconciliationConfig) -> EligibilityCriteria {
    EligibilityCriteria::new(
        cfg.stale_statuses.iter().copied(),
        cfg.min_age(),
        Some(cfg.max_attempts_before_give_up),
        Some(cfg.max_questions_per_run),
    )
}

pub struct ReconciliationEngine {
    store: Arc<dyn QuestionStore>,
    marketplace: Arc<MarketplaceAdapter>,
    sink: Arc<dyn QuestionEventSink>,
    stats: Arc<StatsAggregator>,
    config: RwLock<ReconciliationConfig>,
    in_flight: InFlightSet,
    /// Cancelled by `stop()`, then replaced so later runs start clean.
    stop: RwLock<CancellationToken>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn QuestionStore>,
        marketplace: Arc<MarketplaceAdapter>,
        sink: Arc<dyn QuestionEventSink>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            marketplace,
            sink,
            stats: Arc::new(StatsAggregator::new()),
            config: RwLock::new(config),
            in_flight: InFlightSet::new(),
            stop: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    pub async fn reconcile_all(&self) -> Result<ReconciliationResponse, EngineError> {
        self.reconcile_scope(ReconcileScope::All, &CancellationToken::new())
            .await
    }

    pub async fn reconcile_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<ReconciliationResponse, EngineError> {
        self.reconcile_scope(
            ReconcileScope::Organization(organization_id),
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn reconcile_account(
        &self,
        account_id: Uuid,
    ) -> Result<ReconciliationResponse, EngineError> {
        self.reconcile_scope(ReconcileScope::Account(account_id), &CancellationToken::new())
            .await
    }

    pub async fn reconcile_question(
        &self,
        question_id: Uuid,
    ) -> Result<ReconciliationResponse, EngineError> {
        self.reconcile_scope(
            ReconcileScope::Question(question_id),
            &CancellationToken::new(),
        )
        .await
    }

    /// Cancel every run in flight. Each finishes its current question and
    /// reports the rest as unprocessed.
    pub async fn stop(&self) {
        let mut token = self.stop.write().await;
        token.cancel();
        *token = CancellationToken::new();
        info!("reconciliation stop requested");
    }

    // -----------------------------------------------------------------------
    // Stats / config surface
    // -----------------------------------------------------------------------

    pub async fn get_reconciliation_system_stats(&self) -> ReconciliationStats {
        self.stats.snapshot().await
    }

    pub async fn reconciliation_config(&self) -> ReconciliationConfig {
        self.config.read().await.clone()
    }

    /// Validate and swap the live config. Runs already started keep theirs.
    pub async fn set_reconciliation_config(
        &self,
        cfg: ReconciliationConfig,
    ) -> Result<(), EngineError> {
        cfg.validate()
            .map_err(|e| EngineError::InvalidConfig(format!("{e:#}")))?;

        self.marketplace
            .limiter()
            .reconfigure(RateLimits::from_config(&cfg));
        self.marketplace.reconfigure(&cfg).await;
        *self.config.write().await = cfg;
        info!("reconciliation config replaced");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    async fn load(
        &self,
        scope: &ReconcileScope,
        cfg: &ReconciliationConfig,
    ) -> Result<Vec<CandidateQuestion>, EngineError> {
        match scope {
            ReconcileScope::Question(id) => match self.store.load_question(*id).await {
                Ok(Some(c)) => Ok(vec![c]),
                Ok(None) => Err(EngineError::QuestionNotFound(*id)),
                Err(e) => Err(EngineError::Storage(format!("{e:#}"))),
            },
            _ => {
                let statuses: Vec<QuestionStatus> = cfg
                    .stale_statuses
                    .iter()
                    .copied()
                    .filter(|s| !s.is_settled())
                    .collect();
                self.store
                    .load_candidates(scope, &statuses)
                    .await
                    .map_err(|e| EngineError::Storage(format!("{e:#}")))
            }
        }
    }

    async fn record(
        &self,
        run_id: Uuid,
        result: ReconciliationResult,
        results: &mut Vec<ReconciliationResult>,
    ) {
        self.stats.record(run_id, &result).await;
        results.push(result);
    }

    /// Run one reconciliation over `scope`. `cancel` is an extra stop signal
    /// owned by the caller (the scheduler passes its own).
    pub async fn reconcile_scope(
        &self,
        scope: ReconcileScope,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResponse, EngineError> {
        let cfg = self.config.read().await.clone();
        let stop = self.stop.read().await.clone();
        let is_cancelled = || stop.is_cancelled() || cancel.is_cancelled();

        let started_at = Utc::now();

        // A bad question id is a caller error, not a degraded run.
        let candidates = match self.load(&scope, &cfg).await {
            Ok(c) => c,
            Err(e @ EngineError::QuestionNotFound(_)) => {
                warn!(scope = %scope, error = %e, "reconciliation target unknown");
                return Err(e);
            }
            Err(e) => {
                let run_id = self.stats.begin_run(scope).await;
                error!(run_id = %run_id, scope = %scope, error = %e, "reconciliation run aborted");
                self.stats
                    .finish_run(
                        run_id,
                        RunOutcome::Aborted {
                            error: e.to_string(),
                        },
                    )
                    .await;
                return Err(e);
            }
        };
        let run_id = self.stats.begin_run(scope).await;

        let now = Utc::now();
        let report = select_eligible(candidates, &scope, &eligibility_criteria(&cfg), now);
        info!(
            run_id = %run_id,
            scope = %scope,
            selected = report.selected_count(),
            skipped = report.skipped.len(),
            "reconciliation run started"
        );

        let mut results: Vec<ReconciliationResult> =
            Vec::with_capacity(report.selected_count() + report.skipped.len());
        for s in &report.skipped {
            debug!(run_id = %run_id, question_id = %s.question_id, reason = %s.reason, "ineligible");
            self.record(run_id, s.to_result(now), &mut results).await;
        }

        let queue: Vec<Question> = report
            .batches
            .into_iter()
            .flat_map(|b| b.questions)
            .collect();
        let mut reauth_accounts: HashSet<Uuid> = HashSet::new();
        let mut deferred: Vec<(Question, ReconciliationResult)> = Vec::new();
        let mut rate_limit_timeouts: u64 = 0;
        let mut unprocessed = 0usize;
        let mut cancelled = false;
        // Set by a 429: no marketplace call before this instant.
        let mut resume_at: Option<Instant> = None;

        for (idx, q) in queue.iter().enumerate() {
            let resumed = match resume_at {
                Some(at) => pause_until(at, &stop, cancel).await,
                None => true,
            };
            if !resumed || is_cancelled() {
                cancelled = true;
                unprocessed = queue.len() - idx;
                break;
            }
            if reauth_accounts.contains(&q.account_id) {
                let skipped = Step::skipped(q, IneligibleReason::AccountNeedsReauth.to_string());
                self.record(run_id, skipped.result, &mut results).await;
                continue;
            }

            let step = self.step(run_id, q, &cfg).await;
            if step.reauth {
                reauth_accounts.insert(q.account_id);
            }
            if step.rate_limit_timeout {
                rate_limit_timeouts += 1;
            }
            if step.result.deferred {
                resume_at = Some(self.throttle_backoff(run_id, resume_at, step.retry_after, &cfg));
                let retry = step.updated.unwrap_or_else(|| q.clone());
                deferred.push((retry, step.result));
            } else {
                self.record(run_id, step.result, &mut results).await;
            }
        }

        // Throttled questions get one more try at the end of the run, no sooner
        // than the requeue delay and never inside the provider's back-off.
        if !deferred.is_empty() && !cancelled {
            let requeue_at = Instant::now() + cfg.rate_limited_requeue_delay();
            let until = resume_at.map_or(requeue_at, |at| at.max(requeue_at));
            cancelled = !pause_until(until, &stop, cancel).await;
        }
        for (q, first) in deferred {
            if !cancelled {
                if let Some(at) = resume_at {
                    cancelled = !pause_until(at, &stop, cancel).await;
                }
            }
            if cancelled || is_cancelled() {
                cancelled = true;
                self.record(run_id, first, &mut results).await;
                continue;
            }
            if reauth_accounts.contains(&q.account_id) {
                let skipped = Step::skipped(&q, IneligibleReason::AccountNeedsReauth.to_string());
                self.record(run_id, skipped.result, &mut results).await;
                continue;
            }
            debug!(run_id = %run_id, question_id = %q.id, "re-queued after throttling");
            let step = self.step(run_id, &q, &cfg).await;
            if step.reauth {
                reauth_accounts.insert(q.account_id);
            }
            if step.rate_limit_timeout {
                rate_limit_timeouts += 1;
            }
            if step.result.deferred {
                resume_at = Some(self.throttle_backoff(run_id, resume_at, step.retry_after, &cfg));
            }
            self.record(run_id, step.result, &mut results).await;
        }

        let outcome = if cancelled {
            RunOutcome::Cancelled { unprocessed }
        } else {
            RunOutcome::Completed
        };
        if let Some(summary) = self.stats.finish_run(run_id, outcome).await {
            self.sink.run_finished(&summary);
        }

        let finished_at = Utc::now();
        let mut counts = ActionCounts::from_results(&results);
        counts.rate_limit_timeouts = rate_limit_timeouts;
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        info!(
            run_id = %run_id,
            scope = %scope,
            scanned = counts.scanned,
            reconciled = counts.reconciled,
            retry_failed = counts.retry_failed,
            skipped = counts.skipped,
            unprocessed,
            cancelled,
            duration_ms,
            "reconciliation run finished"
        );

        Ok(ReconciliationResponse {
            run_id,
            scope,
            started_at,
            finished_at,
            duration_ms,
            counts,
            results,
            unprocessed,
            cancelled,
        })
    }

    /// Push `resume_at` out to cover a fresh 429. Earlier holds that reach
    /// further are kept.
    fn throttle_backoff(
        &self,
        run_id: Uuid,
        resume_at: Option<Instant>,
        retry_after: Option<Duration>,
        cfg: &ReconciliationConfig,
    ) -> Instant {
        let wait = retry_after
            .unwrap_or_default()
            .max(cfg.rate_limited_requeue_delay());
        let until = Instant::now() + wait;
        let until = resume_at.map_or(until, |at| at.max(until));
        // The adapter already holds the limiter for an explicit Retry-After;
        // this also covers concurrent runs when the provider gave no header.
        self.marketplace
            .limiter()
            .hold_for(until.saturating_duration_since(Instant::now()));
        warn!(
            run_id = %run_id,
            backoff_ms = wait.as_millis() as u64,
            provider_retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "marketplace throttled; pausing run"
        );
        until
    }

    /// Read remote truth, classify, write, notify. Never fails the run.
    async fn step(&self, run_id: Uuid, q: &Question, cfg: &ReconciliationConfig) -> Step {
        let Some(_claim) = self.in_flight.try_claim(q.id) else {
            debug!(run_id = %run_id, question_id = %q.id, "already in flight");
            return Step::skipped(q, "in flight");
        };

        let outcome = self
            .marketplace
            .observe(q.account_id, &q.marketplace_question_id)
            .await;
        let rate_limit_timeout = matches!(
            outcome,
            RemoteOutcome::Failed {
                kind: FailureKind::RateLimitTimeout,
                ..
            }
        );
        if rate_limit_timeout {
            self.stats.note_rate_limit_timeout(run_id).await;
        }

        let decision = classify(q, &outcome, cfg.max_attempts_before_give_up, Utc::now());

        if decision.flag_account_reauth {
            warn!(
                run_id = %run_id,
                account_id = %q.account_id,
                "refreshed token rejected; account flagged for re-auth"
            );
            if let Err(e) = self.store.flag_account_reauth(q.account_id).await {
                error!(account_id = %q.account_id, error = %format!("{e:#}"), "flag_account_reauth failed");
            }
        }

        match self.store.apply_mutation(&decision.mutation).await {
            Ok(true) => {}
            Ok(false) => {
                info!(run_id = %run_id, question_id = %q.id, "modified concurrently; skipped");
                let mut step = Step::skipped(q, "modified concurrently");
                step.reauth = decision.flag_account_reauth;
                step.rate_limit_timeout = rate_limit_timeout;
                return step;
            }
            Err(e) => {
                let msg = format!("persist failed: {e:#}");
                error!(run_id = %run_id, question_id = %q.id, error = %msg, "question write failed");
                return Step {
                    result: ReconciliationResult {
                        question_id: q.id,
                        account_id: q.account_id,
                        action: ReconcileAction::RetryFailed,
                        new_status: None,
                        error: Some(msg),
                        deferred: false,
                        reconciled_at: decision.mutation.last_reconciled_at,
                    },
                    updated: None,
                    reauth: decision.flag_account_reauth,
                    rate_limit_timeout,
                    retry_after: None,
                };
            }
        }

        if decision.emit_update {
            let event = QuestionUpdateEvent {
                account_id: q.account_id,
                question_id: q.id,
                new_status: decision.mutation.status,
            };
            if let Err(e) = self.sink.emit_question_update(event) {
                warn!(question_id = %q.id, error = %format!("{e:#}"), "question update emit failed");
            }
        }

        let result = decision.to_result();
        match result.action {
            ReconcileAction::MarkedAnsweredManually | ReconcileAction::MarkedExpired => info!(
                run_id = %run_id,
                question_id = %q.id,
                account_id = %q.account_id,
                action = %result.action,
                "question reconciled"
            ),
            ReconcileAction::RetryFailed => warn!(
                run_id = %run_id,
                question_id = %q.id,
                account_id = %q.account_id,
                action = %result.action,
                deferred = result.deferred,
                error = result.error.as_deref().unwrap_or(""),
                "question not reconciled"
            ),
            _ => debug!(
                run_id = %run_id,
                question_id = %q.id,
                action = %result.action,
                "question unchanged"
            ),
        }

        Step {
            result,
            updated: Some(decision.mutation.apply_to(q)),
            reauth: decision.flag_account_reauth,
            rate_limit_timeout,
            retry_after: decision.retry_after,
        }
    }
}
