//! Shared data model for question reconciliation.
//!
//! Plain data only: rows as storage hands them out, the reconcile scope, and
//! the per-question result record. No IO and no policy live here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// QuestionStatus
// ---------------------------------------------------------------------------

/// Local lifecycle of a buyer question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Pending,
    Processing,
    Approved,
    Completed,
    Error,
    Expired,
}

impl QuestionStatus {
    pub const ALL: [QuestionStatus; 6] = [
        QuestionStatus::Pending,
        QuestionStatus::Processing,
        QuestionStatus::Approved,
        QuestionStatus::Completed,
        QuestionStatus::Error,
        QuestionStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "PENDING",
            QuestionStatus::Processing => "PROCESSING",
            QuestionStatus::Approved => "APPROVED",
            QuestionStatus::Completed => "COMPLETED",
            QuestionStatus::Error => "ERROR",
            QuestionStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(QuestionStatus::Pending),
            "PROCESSING" => Ok(QuestionStatus::Processing),
            "APPROVED" => Ok(QuestionStatus::Approved),
            "COMPLETED" => Ok(QuestionStatus::Completed),
            "ERROR" => Ok(QuestionStatus::Error),
            "EXPIRED" => Ok(QuestionStatus::Expired),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }

    /// Statuses that carry an `approved_at` timestamp.
    pub fn is_answered(&self) -> bool {
        matches!(self, QuestionStatus::Approved | QuestionStatus::Completed)
    }

    /// Terminal for reconciliation: nothing left to converge.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            QuestionStatus::Approved | QuestionStatus::Completed | QuestionStatus::Expired
        )
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown question status '{}'; expected one of: \
             PENDING | PROCESSING | APPROVED | COMPLETED | ERROR | EXPIRED",
            self.0
        )
    }
}

impl std::error::Error for UnknownStatus {}

// ---------------------------------------------------------------------------
// Tenancy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
}

/// A marketplace seller identity owned by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub nickname: String,
    pub is_active: bool,
    /// Set when a refreshed token was still rejected; cleared by a re-login.
    pub needs_reauth: bool,
}

// ---------------------------------------------------------------------------
// Question
// ---------------------------------------------------------------------------

/// Listing the question was asked on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: Option<String>,
    pub title: Option<String>,
    /// Decimal string as the marketplace reports it.
    pub price: Option<String>,
    pub permalink: Option<String>,
}

/// One buyer question tracked locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub marketplace_question_id: String,
    pub account_id: Uuid,
    pub body: String,
    pub ai_suggestion: Option<String>,
    /// Text published on the marketplace, whoever wrote it.
    pub answer_text: Option<String>,
    pub status: QuestionStatus,
    pub received_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub item: ItemRef,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub reconcile_attempts: u32,
    /// Give-up flag: no further automatic reconciliation.
    pub requires_manual_review: bool,
}

impl Question {
    /// `approved_at` must be set exactly when the status is APPROVED or COMPLETED.
    pub fn check_invariants(&self) -> Result<(), QuestionInvariantError> {
        match (self.status.is_answered(), self.approved_at.is_some()) {
            (true, false) => Err(QuestionInvariantError::MissingApprovedAt {
                question_id: self.id,
                status: self.status,
            }),
            (false, true) => Err(QuestionInvariantError::UnexpectedApprovedAt {
                question_id: self.id,
                status: self.status,
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionInvariantError {
    MissingApprovedAt {
        question_id: Uuid,
        status: QuestionStatus,
    },
    UnexpectedApprovedAt {
        question_id: Uuid,
        status: QuestionStatus,
    },
}

impl fmt::Display for QuestionInvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApprovedAt {
                question_id,
                status,
            } => write!(f, "question {question_id} is {status} but has no approved_at"),
            Self::UnexpectedApprovedAt {
                question_id,
                status,
            } => write!(f, "question {question_id} is {status} but carries approved_at"),
        }
    }
}

impl std::error::Error for QuestionInvariantError {}

/// A question row joined with the owning account's flags.
///
/// This is the unit storage hands to the eligibility filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuestion {
    pub question: Question,
    pub organization_id: Uuid,
    pub account_active: bool,
    pub account_needs_reauth: bool,
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// What one reconciliation invocation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReconcileScope {
    All,
    Organization(Uuid),
    Account(Uuid),
    Question(Uuid),
}

impl ReconcileScope {
    /// In-memory membership check, independent of what storage returned.
    pub fn contains(&self, candidate: &CandidateQuestion) -> bool {
        match self {
            ReconcileScope::All => true,
            ReconcileScope::Organization(org) => candidate.organization_id == *org,
            ReconcileScope::Account(acct) => candidate.question.account_id == *acct,
            ReconcileScope::Question(q) => candidate.question.id == *q,
        }
    }

    pub fn is_single_question(&self) -> bool {
        matches!(self, ReconcileScope::Question(_))
    }
}

impl fmt::Display for ReconcileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileScope::All => write!(f, "all"),
            ReconcileScope::Organization(id) => write!(f, "organization:{id}"),
            ReconcileScope::Account(id) => write!(f, "account:{id}"),
            ReconcileScope::Question(id) => write!(f, "question:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Action taken for one question in one reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileAction {
    NoChange,
    MarkedAnsweredManually,
    MarkedExpired,
    RetryFailed,
    SkippedIneligible,
}

impl ReconcileAction {
    pub const ALL: [ReconcileAction; 5] = [
        ReconcileAction::NoChange,
        ReconcileAction::MarkedAnsweredManually,
        ReconcileAction::MarkedExpired,
        ReconcileAction::RetryFailed,
        ReconcileAction::SkippedIneligible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::NoChange => "NO_CHANGE",
            ReconcileAction::MarkedAnsweredManually => "MARKED_ANSWERED_MANUALLY",
            ReconcileAction::MarkedExpired => "MARKED_EXPIRED",
            ReconcileAction::RetryFailed => "RETRY_FAILED",
            ReconcileAction::SkippedIneligible => "SKIPPED_INELIGIBLE",
        }
    }

    /// Local state was converged to the marketplace.
    pub fn is_reconciled(&self) -> bool {
        matches!(
            self,
            ReconcileAction::MarkedAnsweredManually | ReconcileAction::MarkedExpired
        )
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral per-question outcome. Kept in logs, stats and API responses only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub question_id: Uuid,
    pub account_id: Uuid,
    pub action: ReconcileAction,
    /// Status written by this step, if it changed.
    pub new_status: Option<QuestionStatus>,
    pub error: Option<String>,
    /// Provider asked us to slow down; retried later without using the attempt budget.
    #[serde(default)]
    pub deferred: bool,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationResult {
    pub fn skipped(
        question_id: Uuid,
        account_id: Uuid,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            question_id,
            account_id,
            action: ReconcileAction::SkippedIneligible,
            new_status: None,
            error: Some(reason.into()),
            deferred: false,
            reconciled_at: at,
        }
    }
}

/// Real-time notification for connected dashboard clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionUpdateEvent {
    pub account_id: Uuid,
    pub question_id: Uuid,
    pub new_status: QuestionStatus,
}
