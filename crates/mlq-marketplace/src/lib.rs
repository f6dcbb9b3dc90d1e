//! mlq-marketplace
//!
//! Everything that talks to the marketplace on behalf of reconciliation:
//! the raw question endpoint ([`MarketplaceApi`]), seller tokens
//! ([`TokenProvider`]), the shared [`RateLimiter`], the transient
//! [`RetryPolicy`], and the [`MarketplaceAdapter`] that composes them.

mod client;
mod error;
pub mod rate_limit;
pub mod retry;
pub mod token;

pub use client::{outcome_from, HttpMarketplaceApi, MarketplaceAdapter, MarketplaceApi};
pub use error::{MarketplaceError, TokenError};
pub use rate_limit::{RateLimiter, RateLimits};
pub use retry::{RetryDecision, RetryPolicy};
pub use token::{AccessToken, CredentialStore, OAuthTokenProvider, StoredCredentials, TokenProvider};
