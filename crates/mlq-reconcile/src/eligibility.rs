//! Eligibility filter: which candidates a run may touch, and in what order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mlq_schemas::{CandidateQuestion, Question, ReconcileScope};
use uuid::Uuid;

use crate::{AccountBatch, EligibilityCriteria, EligibilityReport, IneligibleReason, SkippedCandidate};

/// First criterion the candidate fails, or `None` when it is eligible.
///
/// Scope membership is checked separately by the caller.
fn ineligible_reason(
    c: &CandidateQuestion,
    criteria: &EligibilityCriteria,
    now: DateTime<Utc>,
) -> Option<IneligibleReason> {
    let q = &c.question;
    if !criteria.is_stale(q.status) {
        return Some(IneligibleReason::NotStale { status: q.status });
    }
    if q.requires_manual_review {
        return Some(IneligibleReason::ManualReviewRequired);
    }
    if let Some(max) = criteria.max_attempts {
        if q.reconcile_attempts >= max {
            return Some(IneligibleReason::AttemptCeilingReached {
                attempts: q.reconcile_attempts,
            });
        }
    }
    if !c.account_active {
        return Some(IneligibleReason::AccountInactive);
    }
    if c.account_needs_reauth {
        return Some(IneligibleReason::AccountNeedsReauth);
    }
    let age = now - q.received_at;
    if age < criteria.min_age {
        return Some(IneligibleReason::TooRecent {
            age_ms: age.num_milliseconds(),
        });
    }
    None
}

fn oldest_first(a: &Question, b: &Question) -> std::cmp::Ordering {
    a.received_at
        .cmp(&b.received_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Select the questions a run should reconcile.
///
/// Candidates outside `scope` are dropped whatever storage returned. Candidates
/// whose status is not stale are dropped silently unless the scope is a single
/// question, in which case every rejection is reported. When the criteria cap
/// the run size, the globally oldest questions win and the rest are reported
/// as `OverRunLimit`.
pub fn select_eligible(
    candidates: Vec<CandidateQuestion>,
    scope: &ReconcileScope,
    criteria: &EligibilityCriteria,
    now: DateTime<Utc>,
) -> EligibilityReport {
    let report_everything = scope.is_single_question();
    let mut selected: Vec<Question> = Vec::new();
    let mut skipped: Vec<SkippedCandidate> = Vec::new();

    for c in candidates {
        if !scope.contains(&c) {
            continue;
        }
        match ineligible_reason(&c, criteria, now) {
            None => selected.push(c.question),
            Some(IneligibleReason::NotStale { .. }) if !report_everything => {}
            Some(reason) => skipped.push(SkippedCandidate {
                question_id: c.question.id,
                account_id: c.question.account_id,
                reason,
            }),
        }
    }

    selected.sort_by(oldest_first);
    selected.dedup_by(|a, b| a.id == b.id);

    if let Some(max) = criteria.max_questions {
        if selected.len() > max {
            for q in selected.drain(max..) {
                skipped.push(SkippedCandidate {
                    question_id: q.id,
                    account_id: q.account_id,
                    reason: IneligibleReason::OverRunLimit,
                });
            }
        }
    }

    // `selected` is globally oldest-first, so the first question pushed into
    // each group is that account's oldest.
    let mut groups: BTreeMap<Uuid, Vec<Question>> = BTreeMap::new();
    for q in selected {
        groups.entry(q.account_id).or_default().push(q);
    }
    let mut batches: Vec<AccountBatch> = groups
        .into_iter()
        .map(|(account_id, questions)| AccountBatch {
            account_id,
            questions,
        })
        .collect();
    batches.sort_by(|a, b| {
        oldest_first(&a.questions[0], &b.questions[0])
            .then_with(|| a.account_id.cmp(&b.account_id))
    });

    skipped.sort_by(|a, b| a.question_id.cmp(&b.question_id));

    EligibilityReport { batches, skipped }
}
