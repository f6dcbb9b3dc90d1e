//! Scenario: overlapping runs and concurrent writers
//!
//! # Invariants under test
//!
//! 1. A question already inside one run's step is skipped by any other run
//!    ("in flight") without a second marketplace call.
//! 2. When another writer moves the row between read and write, the
//!    conditional update loses, the result is skipped ("modified
//!    concurrently") and no event fires.

use std::sync::Arc;

use mlq_schemas::{QuestionStatus, ReconcileAction};
use mlq_testkit::*;
use tokio::sync::Notify;

#[tokio::test]
async fn second_run_skips_in_flight_question() {
    let c = stale(ORG_A, ACCOUNT_A1);
    let (id, mq) = (c.question.id, c.question.marketplace_question_id.clone());

    let h = Harness::new(fast_config(), [c]);
    let release = Arc::new(Notify::new());
    h.api.script(
        &mq,
        [Reply::Held {
            release: release.clone(),
            then: Box::new(Reply::answered("sí")),
        }],
    );

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.reconcile_all().await });
    h.api.started.notified().await;
    assert!(h.engine.in_flight().contains(&id));

    // 1)
    let second = h.engine.reconcile_question(id).await.unwrap();
    assert_eq!(second.results.len(), 1);
    assert_eq!(second.results[0].action, ReconcileAction::SkippedIneligible);
    assert_eq!(second.results[0].error.as_deref(), Some("in flight"));

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.results[0].action, ReconcileAction::MarkedAnsweredManually);
    assert_eq!(h.api.hits(&mq), 1);
    assert_eq!(h.sink.events().len(), 1);
    assert!(h.engine.in_flight().is_empty());
}

#[tokio::test]
async fn concurrent_writer_wins() {
    let c = stale(ORG_A, ACCOUNT_A1);
    let (id, mq) = (c.question.id, c.question.marketplace_question_id.clone());

    let h = Harness::new(fast_config(), [c]);
    let release = Arc::new(Notify::new());
    h.api.script(
        &mq,
        [Reply::Held {
            release: release.clone(),
            then: Box::new(Reply::closed()),
        }],
    );

    let engine = h.engine.clone();
    let run = tokio::spawn(async move { engine.reconcile_all().await });
    h.api.started.notified().await;

    // the answer pipeline picks the question back up meanwhile
    h.store.set_status(id, QuestionStatus::Pending);
    release.notify_one();

    // 2)
    let resp = run.await.unwrap().unwrap();
    assert_eq!(resp.results[0].action, ReconcileAction::SkippedIneligible);
    assert_eq!(resp.results[0].error.as_deref(), Some("modified concurrently"));
    assert_eq!(h.status_of(id), Some(QuestionStatus::Pending));
    assert_eq!(h.store.write_count(), 0);
    assert!(h.sink.events().is_empty());
}
