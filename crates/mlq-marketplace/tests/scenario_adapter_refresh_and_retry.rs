//! Scenario: adapter refresh-once and transient retry
//!
//! # Invariants under test
//!
//! 1. A rejected token is refreshed once and the call retried with the new
//!    token; the refresh does not use up the transient retry budget.
//! 2. A second rejection after refresh returns `Unauthorized { reauth_required: true }`.
//! 3. Transient failures are retried up to `retryBackoff.maxAttempts` total hits.
//! 4. A 404 is returned after exactly one hit, no retry.
//! 5. A stalled call is cut off by the per-call timeout and reported as `Transient`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use httpmock::prelude::*;
use mlq_config::{ReconciliationConfig, RetryBackoff};
use mlq_marketplace::*;
use serde_json::json;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Hands out `old` until refreshed, then `new`.
struct RotatingTokens {
    refreshes: AtomicUsize,
}

#[async_trait]
impl TokenProvider for RotatingTokens {
    async fn get_valid_token(&self, _account_id: Uuid) -> Result<AccessToken, TokenError> {
        let value = if self.refreshes.load(Ordering::SeqCst) == 0 {
            "old"
        } else {
            "new"
        };
        Ok(AccessToken {
            value: value.to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(6),
        })
    }

    async fn refresh_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.get_valid_token(account_id).await
    }
}

fn config(per_call_timeout_ms: u64) -> ReconciliationConfig {
    ReconciliationConfig {
        per_call_timeout_ms,
        retry_backoff: RetryBackoff {
            base_ms: 1,
            max_ms: 2,
            factor: 2.0,
            max_attempts: 3,
        },
        ..ReconciliationConfig::default()
    }
}

fn adapter(server: &MockServer, tokens: Arc<RotatingTokens>, cfg: &ReconciliationConfig) -> MarketplaceAdapter {
    MarketplaceAdapter::new(
        Arc::new(HttpMarketplaceApi::new_with_base_url(server.base_url())),
        tokens,
        Arc::new(RateLimiter::new(RateLimits::from_config(cfg))),
        cfg,
    )
}

fn tokens() -> Arc<RotatingTokens> {
    Arc::new(RotatingTokens {
        refreshes: AtomicUsize::new(0),
    })
}

// ----------------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn scenario_unauthorized_refreshes_once_then_succeeds() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/questions/77")
                .header("authorization", "Bearer old");
            then.status(401);
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/questions/77")
                .header("authorization", "Bearer new");
            then.status(200).json_body(json!({ "status": "UNANSWERED" }));
        })
        .await;

    let t = tokens();
    let a = adapter(&server, t.clone(), &config(2_000));
    let raw = a.fetch_question_status(Uuid::new_v4(), "77").await.unwrap();

    assert_eq!(raw.status, "UNANSWERED");
    rejected.assert_hits_async(1).await;
    accepted.assert_hits_async(1).await;
    assert_eq!(t.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_second_rejection_requires_reauth() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/questions/78");
            then.status(403);
        })
        .await;

    let t = tokens();
    let a = adapter(&server, t.clone(), &config(2_000));
    let err = a
        .fetch_question_status(Uuid::new_v4(), "78")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        MarketplaceError::Unauthorized {
            reauth_required: true
        }
    );
    m.assert_hits_async(2).await;
    assert_eq!(t.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_transient_retried_up_to_budget() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/questions/79");
            then.status(502);
        })
        .await;

    let a = adapter(&server, tokens(), &config(2_000));
    let err = a
        .fetch_question_status(Uuid::new_v4(), "79")
        .await
        .unwrap_err();

    assert!(matches!(err, MarketplaceError::Transient { .. }));
    m.assert_hits_async(3).await;
}

#[tokio::test]
async fn scenario_not_found_hits_once() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/questions/80");
            then.status(404);
        })
        .await;

    let a = adapter(&server, tokens(), &config(2_000));
    let err = a
        .fetch_question_status(Uuid::new_v4(), "80")
        .await
        .unwrap_err();

    assert_eq!(err, MarketplaceError::NotFound);
    m.assert_hits_async(1).await;
}

#[tokio::test]
async fn scenario_stalled_call_times_out_as_transient() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/questions/81");
            then.status(200)
                .delay(Duration::from_millis(800))
                .json_body(json!({ "status": "UNANSWERED" }));
        })
        .await;

    let mut cfg = config(50);
    cfg.retry_backoff.max_attempts = 1;
    let a = adapter(&server, tokens(), &cfg);
    let err = a
        .fetch_question_status(Uuid::new_v4(), "81")
        .await
        .unwrap_err();

    match err {
        MarketplaceError::Transient { message } => assert!(message.contains("50 ms"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
}
