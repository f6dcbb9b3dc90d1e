use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use mlq_runtime::{QuestionEventSink, RunSummary};
use mlq_schemas::QuestionUpdateEvent;

/// Keeps every event; can be told to fail emits.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<QuestionUpdateEvent>>,
    runs: Mutex<Vec<RunSummary>>,
    fail: AtomicBool,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_emits(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<QuestionUpdateEvent> {
        relock(&self.events).clone()
    }

    pub fn runs(&self) -> Vec<RunSummary> {
        relock(&self.runs).clone()
    }
}

impl QuestionEventSink for RecordingSink {
    fn emit_question_update(&self, event: QuestionUpdateEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("no subscriber");
        }
        relock(&self.events).push(event);
        Ok(())
    }

    fn run_finished(&self, summary: &RunSummary) {
        relock(&self.runs).push(summary.clone());
    }
}
