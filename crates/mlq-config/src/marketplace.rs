//! `marketplace` section: endpoints and the env var names holding OAuth
//! client credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MARKETPLACE_POINTER: &str = "/marketplace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct MarketplaceSettings {
    pub base_url: String,
    pub oauth_url: String,
    /// Env var NAME holding the OAuth client id.
    pub client_id_env: String,
    /// Env var NAME holding the OAuth client secret.
    pub client_secret_env: String,
    /// Tokens expiring within this many seconds are refreshed before use.
    pub token_refresh_skew_secs: i64,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.mercadolibre.com".to_string(),
            oauth_url: "https://api.mercadolibre.com/oauth/token".to_string(),
            client_id_env: "MLQ_MARKETPLACE_CLIENT_ID".to_string(),
            client_secret_env: "MLQ_MARKETPLACE_CLIENT_SECRET".to_string(),
            token_refresh_skew_secs: 300,
        }
    }
}

impl MarketplaceSettings {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        match config_json.pointer(MARKETPLACE_POINTER) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(section) => serde_json::from_value(section.clone())
                .context("CONFIG_INVALID section=/marketplace: does not match schema"),
        }
    }
}
