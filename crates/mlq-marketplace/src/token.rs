//! Seller access tokens.
//!
//! [`OAuthTokenProvider`] hands out a stored access token while it is fresh and
//! otherwise exchanges the stored refresh token at the OAuth endpoint. Refresh
//! tokens are single use, so refreshes of one account are serialized and the
//! rotated pair is written back before the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mlq_config::secrets::MarketplaceSecrets;
use mlq_config::MarketplaceSettings;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::TokenError;

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token pair as persisted per account.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredCredentials {
    pub fn access(&self) -> AccessToken {
        AccessToken {
            value: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("access_token", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where token pairs live. Implemented by the database layer.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_credentials(
        &self,
        account_id: Uuid,
    ) -> Result<Option<StoredCredentials>, TokenError>;

    async fn save_credentials(
        &self,
        account_id: Uuid,
        creds: &StoredCredentials,
    ) -> Result<(), TokenError>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A token that will not expire within the refresh skew.
    async fn get_valid_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError>;

    /// Exchange the refresh token now, even if the current one looks fresh.
    async fn refresh_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError>;
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl OAuthErrorBody {
    fn describe(&self, status: u16) -> String {
        match (&self.error, &self.message) {
            (Some(e), Some(m)) => format!("status={status} {e}: {m}"),
            (Some(e), None) => format!("status={status} {e}"),
            (None, Some(m)) => format!("status={status} {m}"),
            (None, None) => format!("status={status}"),
        }
    }
}

pub struct OAuthTokenProvider {
    http: reqwest::Client,
    oauth_url: String,
    secrets: MarketplaceSecrets,
    store: Arc<dyn CredentialStore>,
    skew: Duration,
    refresh_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OAuthTokenProvider {
    pub fn new(
        settings: &MarketplaceSettings,
        secrets: MarketplaceSecrets,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::new_with_oauth_url(
            settings.oauth_url.clone(),
            Duration::seconds(settings.token_refresh_skew_secs),
            secrets,
            store,
        )
    }

    pub fn new_with_oauth_url(
        oauth_url: String,
        skew: Duration,
        secrets: MarketplaceSecrets,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            oauth_url,
            secrets,
            store,
            skew,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, creds: &StoredCredentials, now: DateTime<Utc>) -> bool {
        creds.expires_at - self.skew > now
    }

    async fn load(&self, account_id: Uuid) -> Result<StoredCredentials, TokenError> {
        self.store
            .load_credentials(account_id)
            .await?
            .ok_or(TokenError::NoCredentials(account_id))
    }

    async fn account_lock(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(account_id).or_default().clone()
    }

    async fn refresh_inner(&self, account_id: Uuid, force: bool) -> Result<AccessToken, TokenError> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        // Another caller may have rotated the pair while we queued.
        let creds = self.load(account_id).await?;
        if !force && self.is_fresh(&creds, Utc::now()) {
            return Ok(creds.access());
        }

        let fresh = self.exchange(account_id, &creds).await?;
        self.store.save_credentials(account_id, &fresh).await?;
        info!(account_id = %account_id, expires_at = %fresh.expires_at, "access token refreshed");
        Ok(fresh.access())
    }

    async fn exchange(
        &self,
        account_id: Uuid,
        creds: &StoredCredentials,
    ) -> Result<StoredCredentials, TokenError> {
        let resp = self
            .http
            .post(&self.oauth_url)
            .header("accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let body: OAuthTokenResponse = resp
                .json()
                .await
                .map_err(|e| TokenError::Transport(format!("token response decode: {e}")))?;
            return Ok(StoredCredentials {
                access_token: body.access_token,
                refresh_token: body
                    .refresh_token
                    .unwrap_or_else(|| creds.refresh_token.clone()),
                expires_at: Utc::now() + Duration::seconds(body.expires_in.max(0)),
            });
        }

        let body: OAuthErrorBody = resp.json().await.unwrap_or_default();
        let detail = body.describe(status.as_u16());
        if matches!(status.as_u16(), 400 | 401 | 403) {
            warn!(account_id = %account_id, %detail, "refresh grant rejected");
            Err(TokenError::Unauthorized(detail))
        } else {
            Err(TokenError::Transport(detail))
        }
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn get_valid_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError> {
        let creds = self.load(account_id).await?;
        if self.is_fresh(&creds, Utc::now()) {
            return Ok(creds.access());
        }
        self.refresh_inner(account_id, false).await
    }

    async fn refresh_token(&self, account_id: Uuid) -> Result<AccessToken, TokenError> {
        self.refresh_inner(account_id, true).await
    }
}
