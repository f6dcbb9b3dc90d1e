use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use mlq_db::QuestionStore;
use mlq_reconcile::QuestionMutation;
use mlq_schemas::{CandidateQuestion, Question, QuestionStatus, ReconcileScope};
use uuid::Uuid;

/// [`QuestionStore`] over a map, with the same conditional-write rule as Postgres.
#[derive(Debug, Default)]
pub struct MemoryQuestionStore {
    rows: Mutex<BTreeMap<Uuid, CandidateQuestion>>,
    fail_loads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    flagged: Mutex<Vec<Uuid>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = CandidateQuestion>) -> Self {
        let s = Self::new();
        for c in rows {
            s.insert(c);
        }
        s
    }

    pub fn insert(&self, c: CandidateQuestion) {
        relock(&self.rows).insert(c.question.id, c);
    }

    pub fn question(&self, id: Uuid) -> Option<Question> {
        relock(&self.rows).get(&id).map(|c| c.question.clone())
    }

    /// Another writer moves the row.
    pub fn set_status(&self, id: Uuid, status: QuestionStatus) {
        if let Some(c) = relock(&self.rows).get_mut(&id) {
            c.question.status = status;
        }
    }

    pub fn fail_loads(&self, on: bool) {
        self.fail_loads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Successful conditional writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn flagged_accounts(&self) -> Vec<Uuid> {
        relock(&self.flagged).clone()
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn load_candidates(
        &self,
        scope: &ReconcileScope,
        statuses: &[QuestionStatus],
    ) -> Result<Vec<CandidateQuestion>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let mut out: Vec<CandidateQuestion> = relock(&self.rows)
            .values()
            .filter(|c| statuses.contains(&c.question.status) && scope.contains(c))
            .cloned()
            .collect();
        out.sort_by_key(|c| (c.question.received_at, c.question.id));
        Ok(out)
    }

    async fn load_question(&self, question_id: Uuid) -> Result<Option<CandidateQuestion>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(relock(&self.rows).get(&question_id).cloned())
    }

    async fn apply_mutation(&self, m: &QuestionMutation) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("deadlock detected");
        }
        let mut rows = relock(&self.rows);
        let Some(row) = rows.get_mut(&m.question_id) else {
            return Ok(false);
        };
        if row.question.status != m.expected_status
            || row.question.reconcile_attempts != m.expected_attempts
        {
            return Ok(false);
        }
        row.question = m.apply_to(&row.question);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn flag_account_reauth(&self, account_id: Uuid) -> Result<()> {
        for c in relock(&self.rows).values_mut() {
            if c.question.account_id == account_id {
                c.account_needs_reauth = true;
            }
        }
        relock(&self.flagged).push(account_id);
        Ok(())
    }
}
