use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use mlq_marketplace::{AccessToken, MarketplaceApi, MarketplaceError, TokenError, TokenProvider};
use mlq_reconcile::remote_adapter::RawQuestionResponse;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// One scripted answer from the fake marketplace.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(RawQuestionResponse),
    Err(MarketplaceError),
    /// Wait for `release` before giving `then`.
    Held {
        release: Arc<Notify>,
        then: Box<Reply>,
    },
    /// Never answers; only the per-call timeout ends it.
    Stall,
}

impl Reply {
    pub fn open() -> Self {
        Reply::Ok(RawQuestionResponse::open("UNANSWERED"))
    }

    pub fn answered(text: &str) -> Self {
        Reply::Ok(RawQuestionResponse::answered(text, "2026-05-10T09:30:00.000-04:00"))
    }

    pub fn closed() -> Self {
        Reply::Ok(RawQuestionResponse::closed("CLOSED_UNANSWERED", None))
    }

    pub fn transient() -> Self {
        Reply::Err(MarketplaceError::transient("http status=503"))
    }

    pub fn throttled() -> Self {
        Reply::Err(MarketplaceError::RateLimited { retry_after: None })
    }

    /// 429 carrying a `Retry-After`.
    pub fn throttled_for(retry_after: std::time::Duration) -> Self {
        Reply::Err(MarketplaceError::RateLimited {
            retry_after: Some(retry_after),
        })
    }

    pub fn unauthorized() -> Self {
        Reply::Err(MarketplaceError::Unauthorized {
            reauth_required: false,
        })
    }

    pub fn not_found() -> Self {
        Reply::Err(MarketplaceError::NotFound)
    }
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`MarketplaceApi`] answering from per-question scripts.
///
/// Each script is consumed front to back; its last reply repeats. Unscripted
/// questions read as open.
#[derive(Debug, Default)]
pub struct ScriptedMarketplace {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    hits: Mutex<HashMap<String, usize>>,
    tokens_seen: Mutex<Vec<String>>,
    calls: Mutex<Vec<(String, Instant)>>,
    /// Pinged at the start of every call.
    pub started: Notify,
}

impl ScriptedMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, marketplace_question_id: &str, replies: impl IntoIterator<Item = Reply>) {
        relock(&self.scripts).insert(
            marketplace_question_id.to_string(),
            replies.into_iter().collect(),
        );
    }

    pub fn hits(&self, marketplace_question_id: &str) -> usize {
        relock(&self.hits)
            .get(marketplace_question_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        relock(&self.hits).values().sum()
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        relock(&self.tokens_seen).clone()
    }

    /// Every call in arrival order, with the (tokio) time it arrived.
    pub fn calls(&self) -> Vec<(String, Instant)> {
        relock(&self.calls).clone()
    }

    fn next_reply(&self, marketplace_question_id: &str) -> Reply {
        let mut scripts = relock(&self.scripts);
        match scripts.get_mut(marketplace_question_id) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or_else(Reply::open),
            Some(q) => q.front().cloned().unwrap_or_else(Reply::open),
            None => Reply::open(),
        }
    }
}

#[async_trait]
impl MarketplaceApi for ScriptedMarketplace {
    async fn get_question(
        &self,
        access_token: &str,
        marketplace_question_id: &str,
    ) -> Result<RawQuestionResponse, MarketplaceError> {
        *relock(&self.hits)
            .entry(marketplace_question_id.to_string())
            .or_insert(0) += 1;
        relock(&self.tokens_seen).push(access_token.to_string());
        relock(&self.calls).push((marketplace_question_id.to_string(), Instant::now()));
        self.started.notify_one();

        let mut reply = self.next_reply(marketplace_question_id);
        loop {
            match reply {
                Reply::Ok(raw) => return Ok(raw),
                Reply::Err(e) => return Err(e),
                Reply::Held { release, then } => {
                    release.notified().await;
                    reply = *then;
                }
                Reply::Stall => std::future::pending::<()>().await,
            }
        }
    }
}

/// Fixed access tokens. Refresh hands out a new value, or fails when told to.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    refreshes: AtomicUsize,
    reject_refresh: AtomicBool,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh fail the way a revoked grant does.
    pub fn reject_refresh(&self, on: bool) {
        self.reject_refresh.store(on, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn token(&self, account_id: Uuid) -> AccessToken {
        AccessToken {
            value: format!("tok-{}-{}", account_id.simple(), self.refresh_count()),
            expires_at: Utc::now() + chrono::Duration::hours(6),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_valid_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError> {
        Ok(self.token(account_id))
    }

    async fn refresh_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError> {
        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(TokenError::Unauthorized("invalid_grant".to_string()));
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(self.token(account_id))
    }
}
