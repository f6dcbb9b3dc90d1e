//! Scenario: scoped runs touch only their scope
//!
//! # Invariants under test
//!
//! 1. An account run calls the marketplace only for that account's questions.
//! 2. An organization run covers every account of the organization and no other.
//! 3. A single-question run reports a settled or too-recent question as
//!    skipped, and an unknown id as not found.
//! 5. An unknown id is not a run: no run is started or counted as aborted.
//! 4. Ineligible questions inside the scope are reported, never fetched.

use chrono::Duration;
use mlq_runtime::EngineError;
use mlq_schemas::{QuestionStatus, ReconcileAction};
use mlq_testkit::*;
use uuid::Uuid;

#[tokio::test]
async fn account_and_organization_scopes() {
    let a1 = stale(ORG_A, ACCOUNT_A1);
    let a2 = stale(ORG_A, ACCOUNT_A2);
    let b1 = stale(ORG_B, ACCOUNT_B1);
    let (mq_a1, mq_a2, mq_b1) = (
        a1.question.marketplace_question_id.clone(),
        a2.question.marketplace_question_id.clone(),
        b1.question.marketplace_question_id.clone(),
    );

    let h = Harness::new(fast_config(), [a1, a2, b1]);

    // 1)
    let resp = h.engine.reconcile_account(ACCOUNT_A1).await.unwrap();
    assert_eq!(resp.results.len(), 1);
    assert!(resp.results.iter().all(|r| r.account_id == ACCOUNT_A1));
    assert_eq!((h.api.hits(&mq_a1), h.api.hits(&mq_a2), h.api.hits(&mq_b1)), (1, 0, 0));

    // 2)
    let resp = h.engine.reconcile_organization(ORG_A).await.unwrap();
    assert_eq!(resp.results.len(), 2);
    assert_eq!((h.api.hits(&mq_a1), h.api.hits(&mq_a2), h.api.hits(&mq_b1)), (2, 1, 0));
}

#[tokio::test]
async fn single_question_scope() {
    let done = candidate(
        ORG_A,
        question(ACCOUNT_A1, QuestionStatus::Completed, Duration::hours(2)),
    );
    let fresh = candidate(
        ORG_A,
        question(ACCOUNT_A1, QuestionStatus::Error, Duration::seconds(10)),
    );
    let (done_id, fresh_id) = (done.question.id, fresh.question.id);

    let h = Harness::new(fast_config(), [done, fresh]);

    // 3) settled
    let resp = h.engine.reconcile_question(done_id).await.unwrap();
    assert_eq!(resp.results.len(), 1);
    assert_eq!(resp.results[0].action, ReconcileAction::SkippedIneligible);
    assert_eq!(
        resp.results[0].error.as_deref(),
        Some("status COMPLETED is not stale")
    );

    // 3) too recent
    let resp = h.engine.reconcile_question(fresh_id).await.unwrap();
    assert_eq!(resp.results[0].action, ReconcileAction::SkippedIneligible);
    assert!(resp.results[0].error.as_deref().unwrap().starts_with("too recent"));

    // 3) unknown
    let runs_before = h.engine.get_reconciliation_system_stats().await.runs_started;
    let missing = Uuid::new_v4();
    let err = h.engine.reconcile_question(missing).await.unwrap_err();
    assert!(matches!(err, EngineError::QuestionNotFound(id) if id == missing));

    // 5)
    let stats = h.engine.get_reconciliation_system_stats().await;
    assert_eq!(stats.runs_started, runs_before);
    assert_eq!(stats.runs_aborted, 0);
    assert!(stats.active_runs.is_empty());

    // 4) nothing fetched
    assert_eq!(h.api.total_hits(), 0);
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn inactive_account_is_reported_not_fetched() {
    let mut c = stale(ORG_B, ACCOUNT_B1);
    c.account_active = false;
    let h = Harness::new(fast_config(), [c]);

    let resp = h.engine.reconcile_all().await.unwrap();
    assert_eq!(resp.counts.skipped, 1);
    assert_eq!(resp.results[0].error.as_deref(), Some("account inactive"));
    assert_eq!(h.api.total_hits(), 0);
}
