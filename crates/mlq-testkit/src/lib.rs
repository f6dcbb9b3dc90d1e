//! Test doubles and fixtures for reconciliation scenarios.
//!
//! Scenario tests under `tests/` drive the real engine and marketplace
//! adapter against these fakes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mlq_config::{ReconciliationConfig, RetryBackoff};
use mlq_marketplace::{MarketplaceAdapter, RateLimiter, RateLimits};
use mlq_runtime::ReconciliationEngine;
use mlq_schemas::{CandidateQuestion, ItemRef, Question, QuestionStatus};
use uuid::Uuid;

mod marketplace;
mod sink;
mod store;

pub use marketplace::{Reply, ScriptedMarketplace, StaticTokenProvider};
pub use sink::RecordingSink;
pub use store::MemoryQuestionStore;

pub const ORG_A: Uuid = Uuid::from_u128(0xA0);
pub const ORG_B: Uuid = Uuid::from_u128(0xB0);
pub const ACCOUNT_A1: Uuid = Uuid::from_u128(0xA1);
pub const ACCOUNT_A2: Uuid = Uuid::from_u128(0xA2);
pub const ACCOUNT_B1: Uuid = Uuid::from_u128(0xB1);

/// Defaults with millisecond backoff and a short re-queue pause.
pub fn fast_config() -> ReconciliationConfig {
    ReconciliationConfig {
        per_call_timeout_ms: 1_000,
        retry_backoff: RetryBackoff {
            base_ms: 1,
            max_ms: 4,
            factor: 2.0,
            max_attempts: 3,
        },
        rate_limited_requeue_delay_ms: 50,
        ..ReconciliationConfig::default()
    }
}

/// Question owned by `account_id`, received `age` ago.
pub fn question(account_id: Uuid, status: QuestionStatus, age: Duration) -> Question {
    let id = Uuid::new_v4();
    let approved_at = status.is_answered().then(Utc::now);
    Question {
        id,
        marketplace_question_id: format!("mq-{}", id.simple()),
        account_id,
        body: "¿tienen stock en talle M?".to_string(),
        ai_suggestion: None,
        answer_text: None,
        status,
        received_at: Utc::now() - age,
        approved_at,
        item: ItemRef::default(),
        last_reconciled_at: None,
        reconcile_attempts: 0,
        requires_manual_review: false,
    }
}

pub fn candidate(organization_id: Uuid, q: Question) -> CandidateQuestion {
    CandidateQuestion {
        question: q,
        organization_id,
        account_active: true,
        account_needs_reauth: false,
    }
}

/// Stale ERROR question, ten minutes old.
pub fn stale(organization_id: Uuid, account_id: Uuid) -> CandidateQuestion {
    candidate(
        organization_id,
        question(account_id, QuestionStatus::Error, Duration::minutes(10)),
    )
}

/// The real engine and adapter wired to in-memory fakes.
pub struct Harness {
    pub store: Arc<MemoryQuestionStore>,
    pub api: Arc<ScriptedMarketplace>,
    pub tokens: Arc<StaticTokenProvider>,
    pub sink: Arc<RecordingSink>,
    pub marketplace: Arc<MarketplaceAdapter>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Harness {
    pub fn new(cfg: ReconciliationConfig, rows: impl IntoIterator<Item = CandidateQuestion>) -> Self {
        let store = Arc::new(MemoryQuestionStore::with_rows(rows));
        let api = Arc::new(ScriptedMarketplace::new());
        let tokens = Arc::new(StaticTokenProvider::new());
        let sink = Arc::new(RecordingSink::new());
        let limiter = Arc::new(RateLimiter::new(RateLimits::from_config(&cfg)));
        let marketplace = Arc::new(MarketplaceAdapter::new(
            api.clone(),
            tokens.clone(),
            limiter,
            &cfg,
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            marketplace.clone(),
            sink.clone(),
            cfg,
        ));
        Self {
            store,
            api,
            tokens,
            sink,
            marketplace,
            engine,
        }
    }

    pub fn status_of(&self, question_id: Uuid) -> Option<QuestionStatus> {
        self.store.question(question_id).map(|q| q.status)
    }
}
