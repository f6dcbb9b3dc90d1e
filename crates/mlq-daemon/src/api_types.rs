//! Request and response types for mlq-daemon HTTP endpoints.
//!
//! Reconciliation responses, stats and config are served as the runtime and
//! config crates define them; only daemon-specific envelopes live here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
    /// Runs that were active when the stop was issued.
    pub active_runs: usize,
}
