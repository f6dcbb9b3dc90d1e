//! Scenario: question gone or closed on the marketplace
//!
//! # Invariants under test
//!
//! 1. A 404 marks the question EXPIRED after a single call: not-found is an
//!    answer, not a failure, and is never retried.
//! 2. A closed remote question is also marked EXPIRED.
//! 3. Both emit one update event; `approved_at` stays empty.

use mlq_schemas::{QuestionStatus, ReconcileAction};
use mlq_testkit::*;

#[tokio::test]
async fn not_found_and_closed_expire() {
    let gone = stale(ORG_A, ACCOUNT_A1);
    let closed = stale(ORG_A, ACCOUNT_A1);
    let (gone_id, gone_mq) = (gone.question.id, gone.question.marketplace_question_id.clone());
    let (closed_id, closed_mq) = (
        closed.question.id,
        closed.question.marketplace_question_id.clone(),
    );

    let h = Harness::new(fast_config(), [gone, closed]);
    h.api.script(&gone_mq, [Reply::not_found()]);
    h.api.script(&closed_mq, [Reply::closed()]);

    let resp = h.engine.reconcile_all().await.unwrap();
    assert_eq!(resp.counts.expired, 2);
    assert!(resp
        .results
        .iter()
        .all(|r| r.action == ReconcileAction::MarkedExpired && r.error.is_none()));

    // 1) one hit, no retry
    assert_eq!(h.api.hits(&gone_mq), 1);

    // 2) both expired
    for id in [gone_id, closed_id] {
        let q = h.store.question(id).unwrap();
        assert_eq!(q.status, QuestionStatus::Expired);
        assert!(q.approved_at.is_none());
        assert_eq!(q.reconcile_attempts, 0);
    }

    // 3) events
    let events = h.sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.new_status == QuestionStatus::Expired));
}
