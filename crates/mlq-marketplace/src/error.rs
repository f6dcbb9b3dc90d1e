use std::time::Duration;

use mlq_reconcile::FailureKind;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the token provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The OAuth server rejected the refresh grant; a human must re-login.
    #[error("refresh grant rejected: {0}")]
    Unauthorized(String),
    #[error("no stored credentials for account {0}")]
    NoCredentials(Uuid),
    #[error("credential storage failed: {0}")]
    Storage(String),
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
}

/// Everything a marketplace call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketplaceError {
    #[error("marketplace rejected the access token (reauth_required={reauth_required})")]
    Unauthorized { reauth_required: bool },

    #[error("question not found on marketplace")]
    NotFound,

    #[error("marketplace throttled the call (retry_after={retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient marketplace failure: {message}")]
    Transient { message: String },

    #[error("rate limiter did not admit the call within {waited:?}")]
    RateLimitTimeout { waited: Duration },

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl MarketplaceError {
    pub fn transient(message: impl Into<String>) -> Self {
        MarketplaceError::Transient {
            message: message.into(),
        }
    }

    /// How the classifier should treat a failed fetch.
    ///
    /// `NotFound` is not a failure for reconciliation and maps to `None`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            MarketplaceError::NotFound => None,
            MarketplaceError::Unauthorized { .. } => Some(FailureKind::Unauthorized),
            MarketplaceError::Token(TokenError::Unauthorized(_)) => Some(FailureKind::Unauthorized),
            MarketplaceError::RateLimited { .. } => Some(FailureKind::RateLimited),
            MarketplaceError::RateLimitTimeout { .. } => Some(FailureKind::RateLimitTimeout),
            MarketplaceError::Transient { .. } | MarketplaceError::Token(_) => {
                Some(FailureKind::Transient)
            }
        }
    }
}
