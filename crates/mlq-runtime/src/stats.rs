//! In-memory reconciliation statistics.
//!
//! Run-scoped counters plus process-lifetime totals. Nothing is persisted;
//! a restart starts from zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mlq_schemas::{ReconcileAction, ReconcileScope, ReconciliationResult};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub scanned: u64,
    pub reconciled: u64,
    pub no_change: u64,
    pub answered_manually: u64,
    pub expired: u64,
    pub retry_failed: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub rate_limit_timeouts: u64,
    /// RETRY_FAILED results that were not provider throttling.
    pub errors: u64,
}

impl ActionCounts {
    pub fn add_result(&mut self, r: &ReconciliationResult) {
        self.scanned += 1;
        if r.action.is_reconciled() {
            self.reconciled += 1;
        }
        match r.action {
            ReconcileAction::NoChange => self.no_change += 1,
            ReconcileAction::MarkedAnsweredManually => self.answered_manually += 1,
            ReconcileAction::MarkedExpired => self.expired += 1,
            ReconcileAction::RetryFailed => {
                self.retry_failed += 1;
                if r.deferred {
                    self.deferred += 1;
                } else {
                    self.errors += 1;
                }
            }
            ReconcileAction::SkippedIneligible => self.skipped += 1,
        }
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ReconciliationResult>) -> Self {
        let mut c = Self::default();
        for r in results {
            c.add_result(r);
        }
        c
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled { unprocessed: usize },
    Aborted { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub scope: ReconcileScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub counts: ActionCounts,
    pub outcome: RunOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub scope: ReconcileScope,
    pub started_at: DateTime<Utc>,
    pub counts: ActionCounts,
}

/// Immutable snapshot handed to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStats {
    pub since: DateTime<Utc>,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_cancelled: u64,
    pub runs_aborted: u64,
    pub last_run: Option<RunSummary>,
    pub cumulative: ActionCounts,
    pub active_runs: Vec<ActiveRun>,
}

#[derive(Debug)]
struct Inner {
    since: DateTime<Utc>,
    runs_started: u64,
    runs_completed: u64,
    runs_cancelled: u64,
    runs_aborted: u64,
    last_run: Option<RunSummary>,
    cumulative: ActionCounts,
    active: BTreeMap<Uuid, ActiveRun>,
}

#[derive(Debug)]
pub struct StatsAggregator {
    inner: RwLock<Inner>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                since: Utc::now(),
                runs_started: 0,
                runs_completed: 0,
                runs_cancelled: 0,
                runs_aborted: 0,
                last_run: None,
                cumulative: ActionCounts::default(),
                active: BTreeMap::new(),
            }),
        }
    }

    pub async fn begin_run(&self, scope: ReconcileScope) -> Uuid {
        let run_id = Uuid::new_v4();
        let mut g = self.inner.write().await;
        g.runs_started += 1;
        g.active.insert(
            run_id,
            ActiveRun {
                run_id,
                scope,
                started_at: Utc::now(),
                counts: ActionCounts::default(),
            },
        );
        run_id
    }

    /// Results for runs that already finished (or never began) only count
    /// toward the cumulative totals.
    pub async fn record(&self, run_id: Uuid, result: &ReconciliationResult) {
        let mut g = self.inner.write().await;
        g.cumulative.add_result(result);
        if let Some(run) = g.active.get_mut(&run_id) {
            run.counts.add_result(result);
        }
    }

    pub async fn note_rate_limit_timeout(&self, run_id: Uuid) {
        let mut g = self.inner.write().await;
        g.cumulative.rate_limit_timeouts += 1;
        if let Some(run) = g.active.get_mut(&run_id) {
            run.counts.rate_limit_timeouts += 1;
        }
    }

    pub async fn finish_run(&self, run_id: Uuid, outcome: RunOutcome) -> Option<RunSummary> {
        let mut g = self.inner.write().await;
        let run = g.active.remove(&run_id)?;
        match outcome {
            RunOutcome::Completed => g.runs_completed += 1,
            RunOutcome::Cancelled { .. } => g.runs_cancelled += 1,
            RunOutcome::Aborted { .. } => g.runs_aborted += 1,
        }
        let finished_at = Utc::now();
        let summary = RunSummary {
            run_id,
            scope: run.scope,
            started_at: run.started_at,
            finished_at,
            duration_ms: (finished_at - run.started_at).num_milliseconds().max(0) as u64,
            counts: run.counts,
            outcome,
        };
        g.last_run = Some(summary.clone());
        Some(summary)
    }

    pub async fn snapshot(&self) -> ReconciliationStats {
        let g = self.inner.read().await;
        ReconciliationStats {
            since: g.since,
            runs_started: g.runs_started,
            runs_completed: g.runs_completed,
            runs_cancelled: g.runs_cancelled,
            runs_aborted: g.runs_aborted,
            last_run: g.last_run.clone(),
            cumulative: g.cumulative.clone(),
            active_runs: g.active.values().cloned().collect(),
        }
    }
}
