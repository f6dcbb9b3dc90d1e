use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mlq_config::ReconciliationConfig;
use mlq_reconcile::remote_adapter::{normalize, RawQuestionResponse};
use mlq_reconcile::RemoteOutcome;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    MarketplaceError, RateLimiter, RetryDecision, RetryPolicy, TokenError, TokenProvider,
};

/// Raw marketplace question endpoint. One call, no retries, no limiter.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn get_question(
        &self,
        access_token: &str,
        marketplace_question_id: &str,
    ) -> Result<RawQuestionResponse, MarketplaceError>;
}

/// reqwest-backed [`MarketplaceApi`].
///
/// The access token is passed per call; never log it.
#[derive(Debug, Clone)]
pub struct HttpMarketplaceApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMarketplaceApi {
    pub fn new() -> Self {
        Self::new_with_base_url("https://api.mercadolibre.com".to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn question_url(&self, marketplace_question_id: &str) -> String {
        format!(
            "{}/questions/{}",
            self.base_url.trim_end_matches('/'),
            marketplace_question_id
        )
    }
}

impl Default for HttpMarketplaceApi {
    fn default() -> Self {
        Self::new()
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceApi {
    async fn get_question(
        &self,
        access_token: &str,
        marketplace_question_id: &str,
    ) -> Result<RawQuestionResponse, MarketplaceError> {
        let resp = self
            .http
            .get(self.question_url(marketplace_question_id))
            .bearer_auth(access_token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| MarketplaceError::transient(format!("request failed: {e}")))?;

        let status = resp.status();
        match status {
            s if s.is_success() => resp
                .json::<RawQuestionResponse>()
                .await
                .map_err(|e| MarketplaceError::transient(format!("response decode failed: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(MarketplaceError::Unauthorized {
                    reauth_required: false,
                })
            }
            StatusCode::NOT_FOUND => Err(MarketplaceError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Err(MarketplaceError::RateLimited {
                retry_after: retry_after(resp.headers()),
            }),
            s => Err(MarketplaceError::transient(format!(
                "http status={}",
                s.as_u16()
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct CallSettings {
    per_call_timeout: Duration,
    retry: RetryPolicy,
}

/// Token, limiter, timeout and retry wrapped around a [`MarketplaceApi`].
pub struct MarketplaceAdapter {
    api: Arc<dyn MarketplaceApi>,
    tokens: Arc<dyn TokenProvider>,
    limiter: Arc<RateLimiter>,
    settings: RwLock<CallSettings>,
}

impl MarketplaceAdapter {
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        tokens: Arc<dyn TokenProvider>,
        limiter: Arc<RateLimiter>,
        cfg: &ReconciliationConfig,
    ) -> Self {
        Self {
            api,
            tokens,
            limiter,
            settings: RwLock::new(CallSettings {
                per_call_timeout: cfg.per_call_timeout(),
                retry: RetryPolicy::from_backoff(&cfg.retry_backoff),
            }),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Pick up timeout and backoff changes. The limiter is reconfigured by its owner.
    pub async fn reconfigure(&self, cfg: &ReconciliationConfig) {
        let mut s = self.settings.write().await;
        s.per_call_timeout = cfg.per_call_timeout();
        s.retry = RetryPolicy::from_backoff(&cfg.retry_backoff);
    }

    async fn call_once(
        &self,
        token: &str,
        marketplace_question_id: &str,
        per_call_timeout: Duration,
    ) -> Result<RawQuestionResponse, MarketplaceError> {
        self.limiter.acquire().await?;
        match tokio::time::timeout(
            per_call_timeout,
            self.api.get_question(token, marketplace_question_id),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(MarketplaceError::transient(format!(
                "call exceeded {} ms",
                per_call_timeout.as_millis()
            ))),
        }
    }

    /// Fetch the marketplace's view of one question.
    ///
    /// A rejected token is refreshed and the call retried once; a second
    /// rejection comes back as `Unauthorized { reauth_required: true }`.
    /// Transient failures are retried per the backoff policy.
    pub async fn fetch_question_status(
        &self,
        account_id: Uuid,
        marketplace_question_id: &str,
    ) -> Result<RawQuestionResponse, MarketplaceError> {
        let CallSettings {
            per_call_timeout,
            retry,
        } = self.settings.read().await.clone();

        let mut token = self.tokens.get_valid_token(account_id).await?;
        let mut refreshed = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self
                .call_once(&token.value, marketplace_question_id, per_call_timeout)
                .await
            {
                Ok(raw) => return Ok(raw),
                Err(e) => e,
            };

            if let MarketplaceError::RateLimited {
                retry_after: Some(wait),
            } = &err
            {
                warn!(
                    account_id = %account_id,
                    marketplace_question_id,
                    retry_after_ms = wait.as_millis() as u64,
                    "marketplace throttled; holding the limiter"
                );
                self.limiter.hold_for(*wait);
            }

            match err {
                MarketplaceError::Unauthorized { .. } if !refreshed => {
                    debug!(account_id = %account_id, "token rejected, refreshing once");
                    refreshed = true;
                    attempt -= 1;
                    token = match self.tokens.refresh_token(account_id).await {
                        Ok(t) => t,
                        Err(TokenError::Unauthorized(_)) => {
                            return Err(MarketplaceError::Unauthorized {
                                reauth_required: true,
                            })
                        }
                        Err(e) => return Err(e.into()),
                    };
                }
                MarketplaceError::Unauthorized { .. } => {
                    return Err(MarketplaceError::Unauthorized {
                        reauth_required: true,
                    })
                }
                other => match retry.decide(&other, attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            account_id = %account_id,
                            marketplace_question_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %other,
                            "retrying marketplace call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => return Err(other),
                },
            }
        }
    }

    /// [`Self::fetch_question_status`] folded into what the classifier consumes.
    pub async fn observe(&self, account_id: Uuid, marketplace_question_id: &str) -> RemoteOutcome {
        let res = self
            .fetch_question_status(account_id, marketplace_question_id)
            .await;
        outcome_from(marketplace_question_id, res)
    }
}

pub fn outcome_from(
    marketplace_question_id: &str,
    res: Result<RawQuestionResponse, MarketplaceError>,
) -> RemoteOutcome {
    match res {
        Ok(raw) => match normalize(marketplace_question_id, raw) {
            Ok(remote) => RemoteOutcome::Observed(remote),
            Err(e) => RemoteOutcome::failed(mlq_reconcile::FailureKind::Transient, e.to_string()),
        },
        Err(MarketplaceError::RateLimited { retry_after }) => RemoteOutcome::throttled(
            MarketplaceError::RateLimited { retry_after }.to_string(),
            retry_after,
        ),
        Err(e) => match e.failure_kind() {
            None => RemoteOutcome::NotFound,
            Some(kind) => RemoteOutcome::failed(kind, e.to_string()),
        },
    }
}
