//! Periodic reconciliation trigger.

use std::sync::Arc;

use mlq_schemas::ReconcileScope;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::ReconciliationEngine;

/// Runs `reconcile_all` every `scheduleIntervalMs` until shut down.
///
/// The first run happens one full period after `spawn`. A run that overruns
/// its period swallows the missed ticks instead of firing back-to-back.
pub struct ReconcileScheduler {
    engine: Arc<ReconciliationEngine>,
    cancel: CancellationToken,
}

fn ticker(period: std::time::Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Skip);
    t
}

impl ReconcileScheduler {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop ticking and cancel a scheduled run in progress.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut period = engine.reconciliation_config().await.schedule_interval();
            let mut tick = ticker(period);
            info!(period_ms = period.as_millis() as u64, "reconcile scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }

                match engine.reconcile_scope(ReconcileScope::All, &cancel).await {
                    Ok(resp) => info!(
                        run_id = %resp.run_id,
                        scanned = resp.counts.scanned,
                        reconciled = resp.counts.reconciled,
                        "scheduled reconciliation done"
                    ),
                    Err(e) => error!(error = %e, "scheduled reconciliation failed"),
                }

                let current = engine.reconciliation_config().await.schedule_interval();
                if current != period {
                    info!(period_ms = current.as_millis() as u64, "schedule interval changed");
                    period = current;
                    tick = ticker(period);
                }
            }

            info!("reconcile scheduler stopped");
        })
    }
}
