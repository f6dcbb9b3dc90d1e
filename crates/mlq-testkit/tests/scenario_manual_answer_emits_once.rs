//! Scenario: question answered directly on the marketplace
//!
//! # Invariants under test
//!
//! 1. A stale local question whose remote twin carries an answer becomes
//!    COMPLETED with the remote answer text and an `approved_at`.
//! 2. Exactly one update event is emitted for it, with the new status.
//! 3. The next run does not select it again: no second call, no second event.

use mlq_schemas::{QuestionStatus, ReconcileAction};
use mlq_testkit::*;

#[tokio::test]
async fn manual_answer_is_reconciled_once() {
    let c = stale(ORG_A, ACCOUNT_A1);
    let id = c.question.id;
    let mq = c.question.marketplace_question_id.clone();

    let h = Harness::new(fast_config(), [c]);
    h.api.script(&mq, [Reply::answered("Sí, hay talle M.")]);

    // 1) first run converges
    let resp = h.engine.reconcile_all().await.unwrap();
    assert_eq!(resp.results.len(), 1);
    assert_eq!(resp.results[0].action, ReconcileAction::MarkedAnsweredManually);
    assert_eq!(resp.results[0].new_status, Some(QuestionStatus::Completed));
    assert_eq!(resp.counts.answered_manually, 1);
    assert_eq!(resp.counts.reconciled, 1);

    let q = h.store.question(id).unwrap();
    assert_eq!(q.status, QuestionStatus::Completed);
    assert_eq!(q.answer_text.as_deref(), Some("Sí, hay talle M."));
    assert!(q.approved_at.is_some());
    assert!(q.last_reconciled_at.is_some());
    q.check_invariants().unwrap();

    // 2) one event
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].question_id, id);
    assert_eq!(events[0].account_id, ACCOUNT_A1);
    assert_eq!(events[0].new_status, QuestionStatus::Completed);

    // 3) settled: not picked up again
    let again = h.engine.reconcile_all().await.unwrap();
    assert!(again.results.is_empty());
    assert_eq!(h.api.hits(&mq), 1);
    assert_eq!(h.sink.events().len(), 1);
    assert_eq!(h.sink.runs().len(), 2);
}

#[tokio::test]
async fn failed_emit_does_not_undo_the_write() {
    let c = stale(ORG_A, ACCOUNT_A1);
    let id = c.question.id;
    let mq = c.question.marketplace_question_id.clone();

    let h = Harness::new(fast_config(), [c]);
    h.api.script(&mq, [Reply::answered("ok")]);
    h.sink.fail_emits(true);

    let resp = h.engine.reconcile_all().await.unwrap();
    assert_eq!(resp.results[0].action, ReconcileAction::MarkedAnsweredManually);
    assert_eq!(h.status_of(id), Some(QuestionStatus::Completed));
    assert!(h.sink.events().is_empty());
}
