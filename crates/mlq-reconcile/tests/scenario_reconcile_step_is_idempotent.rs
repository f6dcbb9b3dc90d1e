//! Scenario: reconcile step is idempotent
//!
//! # Invariants under test
//!
//! 1. Two passes against an unchanged open remote question both yield
//!    NO_CHANGE and never move the local status.
//! 2. Once a question is marked COMPLETED or EXPIRED, a later selection pass
//!    does not pick it again, so no second mutation or event can happen.
//! 3. Every question a pass selects is at least `min_age` old.

use chrono::{DateTime, Duration, Utc};
use mlq_reconcile::remote_adapter::{normalize, RawQuestionResponse};
use mlq_reconcile::*;
use mlq_schemas::{
    CandidateQuestion, ItemRef, Question, QuestionStatus, ReconcileAction, ReconcileScope,
};
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-10T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn candidate(status: QuestionStatus, age: Duration) -> CandidateQuestion {
    CandidateQuestion {
        question: Question {
            id: Uuid::new_v4(),
            marketplace_question_id: "13055512345".to_string(),
            account_id: Uuid::from_u128(7),
            body: "what size is it?".to_string(),
            ai_suggestion: None,
            answer_text: None,
            status,
            received_at: t0() - age,
            approved_at: None,
            item: ItemRef::default(),
            last_reconciled_at: None,
            reconcile_attempts: 0,
            requires_manual_review: false,
        },
        organization_id: Uuid::from_u128(1),
        account_active: true,
        account_needs_reauth: false,
    }
}

fn criteria() -> EligibilityCriteria {
    EligibilityCriteria::new(
        [QuestionStatus::Error, QuestionStatus::Processing],
        std::time::Duration::from_millis(120_000),
        Some(5),
        Some(500),
    )
}

/// Select, classify against `raw`, and write the mutation back into `rows`.
fn pass(
    rows: &mut Vec<CandidateQuestion>,
    raw: &RawQuestionResponse,
    now: DateTime<Utc>,
) -> Vec<ReconcileDecision> {
    let report = select_eligible(rows.clone(), &ReconcileScope::All, &criteria(), now);
    let mut out = Vec::new();
    for q in report.selected() {
        let remote = normalize(&q.marketplace_question_id, raw.clone()).unwrap();
        let d = classify(q, &RemoteOutcome::Observed(remote), 5, now);
        for row in rows.iter_mut() {
            if row.question.id == q.id {
                row.question = d.mutation.apply_to(&row.question);
            }
        }
        out.push(d);
    }
    out
}

#[test]
fn scenario_unchanged_remote_yields_no_change_twice() {
    let mut rows = vec![candidate(QuestionStatus::Processing, Duration::minutes(10))];
    let open = RawQuestionResponse::open("UNANSWERED");

    let first = pass(&mut rows, &open, t0());
    let second = pass(&mut rows, &open, t0() + Duration::minutes(5));

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].action, ReconcileAction::NoChange);
    assert_eq!(second[0].action, ReconcileAction::NoChange);
    assert!(!first[0].emit_update && !second[0].emit_update);
    assert_eq!(rows[0].question.status, QuestionStatus::Processing);
    assert_eq!(
        rows[0].question.last_reconciled_at,
        Some(t0() + Duration::minutes(5))
    );
}

#[test]
fn scenario_settled_question_is_not_selected_again() {
    let mut rows = vec![candidate(QuestionStatus::Error, Duration::hours(1))];
    let answered = RawQuestionResponse::answered("Talle M", "2026-05-10T07:30:00Z");

    let first = pass(&mut rows, &answered, t0());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].action, ReconcileAction::MarkedAnsweredManually);
    assert!(first[0].emit_update);
    assert_eq!(rows[0].question.status, QuestionStatus::Completed);
    assert!(rows[0].question.check_invariants().is_ok());

    let second = pass(&mut rows, &answered, t0() + Duration::minutes(5));
    assert!(second.is_empty(), "COMPLETED must never be picked again");

    let mut rows = vec![candidate(QuestionStatus::Error, Duration::hours(1))];
    let closed = RawQuestionResponse::closed("CLOSED_UNANSWERED", None);
    assert_eq!(
        pass(&mut rows, &closed, t0())[0].action,
        ReconcileAction::MarkedExpired
    );
    assert!(pass(&mut rows, &closed, t0() + Duration::minutes(5)).is_empty());
}

#[test]
fn scenario_selected_questions_respect_min_age() {
    let ages = [0, 30, 119, 120, 121, 3600];
    let rows: Vec<CandidateQuestion> = ages
        .iter()
        .map(|s| candidate(QuestionStatus::Error, Duration::seconds(*s)))
        .collect();

    let report = select_eligible(rows, &ReconcileScope::All, &criteria(), t0());
    assert_eq!(report.selected_count(), 3);
    for q in report.selected() {
        assert!(t0() - q.received_at >= Duration::milliseconds(120_000));
    }
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.reason, IneligibleReason::TooRecent { .. })));
}
