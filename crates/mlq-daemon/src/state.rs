//! Shared runtime state for mlq-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The reconciliation
//! engine is shared with the scheduler task; the bus fans engine events out
//! to SSE clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mlq_runtime::{QuestionEventSink, ReconciliationEngine, RunSummary};
use mlq_schemas::QuestionUpdateEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    QuestionUpdate(QuestionUpdateEvent),
    RunFinished(RunSummary),
    LogLine { level: String, msg: String },
}

pub fn bus_channel() -> broadcast::Sender<BusMsg> {
    let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
    bus
}

// ---------------------------------------------------------------------------
// BusSink
// ---------------------------------------------------------------------------

/// Engine events onto the SSE bus. No connected client is not an error.
#[derive(Clone, Debug)]
pub struct BusSink {
    bus: broadcast::Sender<BusMsg>,
}

impl BusSink {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl QuestionEventSink for BusSink {
    fn emit_question_update(&self, event: QuestionUpdateEvent) -> Result<()> {
        let _ = self.bus.send(BusMsg::QuestionUpdate(event));
        Ok(())
    }

    fn run_finished(&self, summary: &RunSummary) {
        let _ = self.bus.send(BusMsg::RunFinished(summary.clone()));
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub engine: Arc<ReconciliationEngine>,
}

impl AppState {
    /// `bus` must be the one the engine's [`BusSink`] writes to.
    pub fn new(bus: broadcast::Sender<BusMsg>, engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            bus,
            build: BuildInfo {
                service: "mlq-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
        }
    }

    pub fn log(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
