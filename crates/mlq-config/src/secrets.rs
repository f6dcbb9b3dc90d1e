//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (see [`MarketplaceSettings`]).
//! - Binaries call [`resolve_marketplace_secrets`] once at startup and pass the
//!   result into constructors; no other code reads these env vars.
//! - `Debug` output redacts values; errors name the variable, never the value.

use anyhow::{bail, Result};

use crate::MarketplaceSettings;

/// OAuth client credentials used to refresh seller access tokens.
#[derive(Clone)]
pub struct MarketplaceSecrets {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for MarketplaceSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .finish()
    }
}

/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

pub fn resolve_marketplace_secrets(settings: &MarketplaceSettings) -> Result<MarketplaceSecrets> {
    let Some(client_id) = resolve_env(&settings.client_id_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (marketplace client id) is not set or empty",
            settings.client_id_env
        );
    };
    let Some(client_secret) = resolve_env(&settings.client_secret_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (marketplace client secret) is not set or empty",
            settings.client_secret_env
        );
    };
    Ok(MarketplaceSecrets {
        client_id,
        client_secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(id_env: &str, secret_env: &str) -> MarketplaceSettings {
        MarketplaceSettings {
            client_id_env: id_env.to_string(),
            client_secret_env: secret_env.to_string(),
            ..MarketplaceSettings::default()
        }
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let s = settings(
            "MLQ_TEST_SECRETS_MISSING_ID_7F3A",
            "MLQ_TEST_SECRETS_MISSING_SECRET_7F3A",
        );
        let err = resolve_marketplace_secrets(&s).unwrap_err().to_string();
        assert!(err.contains("MLQ_TEST_SECRETS_MISSING_ID_7F3A"), "{err}");
    }

    #[test]
    fn debug_redacts_client_secret() {
        let secrets = MarketplaceSecrets {
            client_id: "123456".to_string(),
            client_secret: "very-secret-value".to_string(),
        };
        let dbg = format!("{secrets:?}");
        assert!(!dbg.contains("very-secret-value"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
