use std::sync::Arc;

use anyhow::{Context, Result};
use mlq_config::secrets::resolve_marketplace_secrets;
use mlq_config::LoadedConfig;
use mlq_db::PgQuestionStore;
use mlq_marketplace::{
    HttpMarketplaceApi, MarketplaceAdapter, OAuthTokenProvider, RateLimiter, RateLimits,
};

use crate::engine::ReconciliationEngine;
use crate::sink::QuestionEventSink;

/// Production engine: Postgres store, OAuth tokens, HTTP marketplace client.
pub fn build_engine(
    loaded: &LoadedConfig,
    store: Arc<PgQuestionStore>,
    sink: Arc<dyn QuestionEventSink>,
) -> Result<ReconciliationEngine> {
    let cfg = loaded.reconciliation()?;
    let settings = loaded.marketplace()?;
    let secrets =
        resolve_marketplace_secrets(&settings).context("marketplace credentials unavailable")?;

    let tokens = Arc::new(OAuthTokenProvider::new(&settings, secrets, store.clone()));
    let api = Arc::new(HttpMarketplaceApi::new_with_base_url(settings.base_url.clone()));
    let limiter = Arc::new(RateLimiter::new(RateLimits::from_config(&cfg)));
    let marketplace = Arc::new(MarketplaceAdapter::new(api, tokens, limiter, &cfg));

    Ok(ReconciliationEngine::new(store, marketplace, sink, cfg))
}
