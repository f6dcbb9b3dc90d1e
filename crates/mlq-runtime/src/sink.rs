use anyhow::Result;
use mlq_schemas::QuestionUpdateEvent;

use crate::stats::RunSummary;

/// Real-time notifications for dashboard clients.
///
/// Fire-and-forget: the engine logs a failed emit and carries on.
pub trait QuestionEventSink: Send + Sync {
    fn emit_question_update(&self, event: QuestionUpdateEvent) -> Result<()>;

    fn run_finished(&self, _summary: &RunSummary) {}
}

/// Drops everything. For the CLI and tests that do not care.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl QuestionEventSink for NoopSink {
    fn emit_question_update(&self, _event: QuestionUpdateEvent) -> Result<()> {
        Ok(())
    }
}
