use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

/// Question ids currently inside a read-classify-write step, across all runs.
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    // The set holds plain ids, so a panic elsewhere cannot leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` when another step already holds `question_id`.
    pub fn try_claim(&self, question_id: Uuid) -> Option<InFlightGuard> {
        if self.lock().insert(question_id) {
            Some(InFlightGuard {
                set: self.clone(),
                question_id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, question_id: &Uuid) -> bool {
        self.lock().contains(question_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claim on drop, including when the step's future is dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    question_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.question_id);
    }
}
