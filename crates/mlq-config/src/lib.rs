//! mlq-config
//!
//! Layered YAML configuration for the reconciliation service.
//!
//! - Docs are merged in order: earlier docs are base, later docs override.
//! - The merged document is canonicalized to JSON and hashed (SHA-256) so a
//!   run can be tied to the exact config it used.
//! - Literal secrets are refused: YAML stores env var NAMES, never values.
//!   See [`secrets`].
//! - Typed sections ([`ReconciliationConfig`], [`MarketplaceSettings`]) are
//!   read from the merged JSON by JSON pointer.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod marketplace;
mod reconcile;
pub mod secrets;

pub use marketplace::MarketplaceSettings;
pub use reconcile::{ReconciliationConfig, RetryBackoff};

/// Comma-separated list of YAML paths, in merge order.
pub const ENV_CONFIG_PATHS: &str = "MLQ_CONFIG";

/// Leaf strings starting with one of these are credentials pasted into YAML.
/// Loading refuses them with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "APP_USR-", // marketplace access token
    "TG-",      // marketplace refresh token
    "Bearer ",
    "-----BEGIN",
];

/// Shorter strings are never treated as secrets ("TG-1" is a plausible label).
const MIN_SECRET_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Empty document: every typed section falls back to its defaults.
    pub fn empty() -> Self {
        // "{}" always parses; the unwrap_or keeps this infallible.
        load_layered_yaml_from_strings(&[]).unwrap_or_else(|_| LoadedConfig {
            config_hash: sha256_hex(b"{}"),
            canonical_json: "{}".to_string(),
            config_json: serde_json::json!({}),
        })
    }

    pub fn reconciliation(&self) -> Result<ReconciliationConfig> {
        ReconciliationConfig::from_config_json(&self.config_json)
    }

    pub fn marketplace(&self) -> Result<MarketplaceSettings> {
        MarketplaceSettings::from_config_json(&self.config_json)
    }
}

/// Split `MLQ_CONFIG` into paths. Unset or blank means "no files".
pub fn paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("CONFIG_READ path={p}")))
        .collect::<Result<Vec<String>>>()?;
    let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(serde_json::Map::new());
    for (layer, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value = serde_yaml::from_str(raw)
            .with_context(|| format!("CONFIG_INVALID layer={layer}: yaml parse failed"))?;
        // An empty YAML document is `null`; treat it as an empty overlay.
        if doc.is_null() {
            continue;
        }
        let overlay = serde_json::to_value(doc)
            .with_context(|| format!("CONFIG_INVALID layer={layer}: not representable as json"))?;
        overlay_onto(&mut merged, overlay);
    }

    if let Some(ptr) = find_secret_literal(&merged, String::new()) {
        bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
    }

    let canonical_json =
        serde_json::to_string(&sorted_keys(&merged)).context("canonical json serialize failed")?;
    Ok(LoadedConfig {
        config_hash: sha256_hex(canonical_json.as_bytes()),
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `overlay` replaces `base`.
fn overlay_onto(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(over_map)) => {
            for (k, v) in over_map {
                overlay_onto(base_map.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, v) => *slot = v,
    }
}

/// Rebuild objects with keys in lexical order so the hash does not depend on
/// YAML key order, whatever map representation serde_json was built with.
fn sorted_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted_keys(&map[k])))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// JSON pointer of the first leaf that looks like a credential.
fn find_secret_literal(v: &Value, ptr: String) -> Option<String> {
    match v {
        Value::Object(map) => map.iter().find_map(|(k, child)| {
            let token = k.replace('~', "~0").replace('/', "~1");
            find_secret_literal(child, format!("{ptr}/{token}"))
        }),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .find_map(|(i, child)| find_secret_literal(child, format!("{ptr}/{i}"))),
        Value::String(s) if looks_like_secret(s) => Some(ptr),
        _ => None,
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim_start();
    t.len() >= MIN_SECRET_LEN && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
