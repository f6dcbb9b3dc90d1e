use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use mlq_schemas::{Question, QuestionStatus, ReconcileAction, ReconciliationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Remote truth
// ---------------------------------------------------------------------------

/// Marketplace-side lifecycle of a question, already normalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteState {
    /// Still waiting for a seller answer.
    Open,
    Answered {
        text: String,
        answered_at: Option<DateTime<Utc>>,
    },
    /// Closed, expired or deleted without an answer.
    Closed { closed_at: Option<DateTime<Utc>> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteQuestion {
    pub marketplace_question_id: String,
    /// Status string exactly as the marketplace sent it, for logs.
    pub raw_status: String,
    pub state: RemoteState,
}

/// Why a marketplace fetch produced no observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// 5xx, transport, timeout, decode, or a token problem other than a rejected grant.
    Transient,
    /// Provider answered 429.
    RateLimited,
    /// The local limiter could not admit the call within its max wait.
    RateLimitTimeout,
    /// Still rejected after one token refresh.
    Unauthorized,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::RateLimitTimeout => "rate_limit_timeout",
            FailureKind::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a single fetch can tell the classifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    Observed(RemoteQuestion),
    /// The marketplace no longer knows the question (HTTP 404).
    NotFound,
    Failed {
        kind: FailureKind,
        detail: String,
        /// Back-off the provider asked for with its 429.
        retry_after: Option<std::time::Duration>,
    },
}

impl RemoteOutcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        RemoteOutcome::Failed {
            kind,
            detail: detail.into(),
            retry_after: None,
        }
    }

    /// Provider throttling, with the `Retry-After` it sent if any.
    pub fn throttled(
        detail: impl Into<String>,
        retry_after: Option<std::time::Duration>,
    ) -> Self {
        RemoteOutcome::Failed {
            kind: FailureKind::RateLimited,
            detail: detail.into(),
            retry_after,
        }
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EligibilityCriteria {
    pub stale_statuses: BTreeSet<QuestionStatus>,
    pub min_age: Duration,
    /// Questions at or past this many attempts are not picked again.
    pub max_attempts: Option<u32>,
    /// Upper bound on selected questions, oldest first across all accounts.
    pub max_questions: Option<usize>,
}

impl EligibilityCriteria {
    /// `min_age` saturates at chrono's maximum for absurd inputs.
    pub fn new(
        stale_statuses: impl IntoIterator<Item = QuestionStatus>,
        min_age: std::time::Duration,
        max_attempts: Option<u32>,
        max_questions: Option<usize>,
    ) -> Self {
        Self {
            stale_statuses: stale_statuses.into_iter().collect(),
            min_age: Duration::from_std(min_age).unwrap_or(Duration::MAX),
            max_attempts,
            max_questions,
        }
    }

    /// Settled statuses are rejected here even when configured as stale.
    pub fn is_stale(&self, status: QuestionStatus) -> bool {
        !status.is_settled() && self.stale_statuses.contains(&status)
    }
}

/// Why a candidate was not selected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibleReason {
    NotStale { status: QuestionStatus },
    TooRecent { age_ms: i64 },
    AccountInactive,
    AccountNeedsReauth,
    ManualReviewRequired,
    AttemptCeilingReached { attempts: u32 },
    OverRunLimit,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStale { status } => write!(f, "status {status} is not stale"),
            Self::TooRecent { age_ms } => write!(f, "too recent ({age_ms} ms old)"),
            Self::AccountInactive => write!(f, "account inactive"),
            Self::AccountNeedsReauth => write!(f, "account requires re-auth"),
            Self::ManualReviewRequired => write!(f, "flagged for manual review"),
            Self::AttemptCeilingReached { attempts } => {
                write!(f, "attempt ceiling reached ({attempts})")
            }
            Self::OverRunLimit => write!(f, "over per-run question limit"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedCandidate {
    pub question_id: Uuid,
    pub account_id: Uuid,
    pub reason: IneligibleReason,
}

impl SkippedCandidate {
    pub fn to_result(&self, at: DateTime<Utc>) -> ReconciliationResult {
        ReconciliationResult::skipped(
            self.question_id,
            self.account_id,
            self.reason.to_string(),
            at,
        )
    }
}

/// Selected questions of one account, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountBatch {
    pub account_id: Uuid,
    pub questions: Vec<Question>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EligibilityReport {
    pub batches: Vec<AccountBatch>,
    pub skipped: Vec<SkippedCandidate>,
}

impl EligibilityReport {
    pub fn selected_count(&self) -> usize {
        self.batches.iter().map(|b| b.questions.len()).sum()
    }

    /// Selected questions in processing order.
    pub fn selected(&self) -> impl Iterator<Item = &Question> {
        self.batches.iter().flat_map(|b| b.questions.iter())
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Final values of the mutable columns, guarded by what was read.
///
/// Storage applies it only if the row still has `expected_status` and
/// `expected_attempts`; otherwise someone else moved the question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionMutation {
    pub question_id: Uuid,
    pub expected_status: QuestionStatus,
    pub expected_attempts: u32,
    pub status: QuestionStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub answer_text: Option<String>,
    pub reconcile_attempts: u32,
    pub requires_manual_review: bool,
    pub last_reconciled_at: DateTime<Utc>,
}

impl QuestionMutation {
    /// Mutation that only stamps `last_reconciled_at`.
    pub fn touch(q: &Question, now: DateTime<Utc>) -> Self {
        Self {
            question_id: q.id,
            expected_status: q.status,
            expected_attempts: q.reconcile_attempts,
            status: q.status,
            approved_at: q.approved_at,
            answer_text: q.answer_text.clone(),
            reconcile_attempts: q.reconcile_attempts,
            requires_manual_review: q.requires_manual_review,
            last_reconciled_at: now,
        }
    }

    pub fn status_changed(&self) -> bool {
        self.status != self.expected_status
    }

    /// The question as it reads after the mutation lands.
    pub fn apply_to(&self, q: &Question) -> Question {
        Question {
            status: self.status,
            approved_at: self.approved_at,
            answer_text: self.answer_text.clone(),
            reconcile_attempts: self.reconcile_attempts,
            requires_manual_review: self.requires_manual_review,
            last_reconciled_at: Some(self.last_reconciled_at),
            ..q.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileDecision {
    pub question_id: Uuid,
    pub account_id: Uuid,
    pub action: ReconcileAction,
    pub mutation: QuestionMutation,
    /// Dashboard clients must hear about this step.
    pub emit_update: bool,
    pub error: Option<String>,
    /// Provider throttled us; retry without spending the attempt budget.
    pub deferred: bool,
    /// How long the provider asked us to stay away, when it said.
    pub retry_after: Option<std::time::Duration>,
    /// Account must re-authenticate before any further call.
    pub flag_account_reauth: bool,
}

impl ReconcileDecision {
    pub fn to_result(&self) -> ReconciliationResult {
        ReconciliationResult {
            question_id: self.question_id,
            account_id: self.account_id,
            action: self.action,
            new_status: self
                .mutation
                .status_changed()
                .then_some(self.mutation.status),
            error: self.error.clone(),
            deferred: self.deferred,
            reconciled_at: self.mutation.last_reconciled_at,
        }
    }
}
