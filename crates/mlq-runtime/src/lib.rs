//! mlq-runtime
//!
//! Orchestration around the pure reconcile core: runs, scheduling,
//! in-flight tracking, statistics and the real-time notification seam.

mod engine;
mod inflight;
mod scheduler;
mod sink;
pub mod stats;
mod wiring;

pub use engine::{eligibility_criteria, EngineError, ReconciliationEngine, ReconciliationResponse};
pub use inflight::{InFlightGuard, InFlightSet};
pub use scheduler::ReconcileScheduler;
pub use sink::{NoopSink, QuestionEventSink};
pub use stats::{ActionCounts, ReconciliationStats, RunOutcome, RunSummary, StatsAggregator};
pub use wiring::build_engine;
