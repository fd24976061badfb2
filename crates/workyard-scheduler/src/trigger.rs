//! Recurring driver for assignment and reconciliation passes.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::supervisor::Supervisor;

/// Fires an assignment pass every `assignment_interval` and a reconciliation
/// pass every `reconcile_interval`.
///
/// Each assignment pass runs in its own task, so a slow pass never delays the
/// next tick and passes may overlap.
pub struct AssignmentTrigger {
    supervisor: Arc<Supervisor>,
}

impl AssignmentTrigger {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run until `cancel` fires. Reconciles once before the first pass.
    pub async fn run(&self, cancel: CancellationToken) {
        let config = self.supervisor.config();
        info!(
            assignment_interval_ms = config.assignment_interval.as_millis() as u64,
            reconcile_interval_ms = config.reconcile_interval.as_millis() as u64,
            concurrency_limit = config.concurrency_limit,
            gate_scope = ?config.gate_scope,
            "Assignment trigger started",
        );

        self.reconcile().await;

        let mut assign_ticker = tokio::time::interval(config.assignment_interval);
        assign_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile_ticker = tokio::time::interval(config.reconcile_interval);
        reconcile_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Startup already reconciled.
        reconcile_ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Assignment trigger shutting down");
                    break;
                }
                _ = assign_ticker.tick() => {
                    tokio::spawn(self.supervisor.run_assignment_pass());
                }
                _ = reconcile_ticker.tick() => {
                    self.reconcile().await;
                }
            }
        }
    }

    async fn reconcile(&self) {
        if let Err(e) = self.supervisor.reconcile().await {
            error!(error = %e, "Reconciliation pass failed");
        }
    }
}
