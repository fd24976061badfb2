//! Assignment engine.
//!
//! A pass reads one snapshot of available workers and due jobs, pairs them
//! by priority tier, and runs every pairing as a concurrent attempt. Pairings
//! are advisory: overlapping passes may pick the same worker or job, and the
//! attempt's guards decide which one wins.

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};
use workyard_config::GateScope;
use workyard_core::{Job, JobPriority, ResourceId, Result, Worker, WorkerStatus};

use crate::supervisor::Supervisor;

/// One worker/job pairing produced by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub worker_id: ResourceId,
    pub job_id: ResourceId,
}

/// Outcome counts of one assignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub assigned: usize,
    pub rejected: usize,
}

/// Pair `workers` with `jobs`.
///
/// Jobs are split into High, Regular and Low buckets, each keeping the order
/// it was given in. Workers are visited in order and each takes the head of the
/// first non-empty bucket. Every worker and job is used at most once.
pub fn plan_assignments(workers: &[Worker], jobs: Vec<Job>) -> Vec<Assignment> {
    let mut buckets: [VecDeque<Job>; 3] = Default::default();
    for job in jobs {
        let tier = match job.priority {
            JobPriority::High => 0,
            JobPriority::Regular => 1,
            JobPriority::Low => 2,
        };
        buckets[tier].push_back(job);
    }

    let mut plan = Vec::new();
    for worker in workers {
        let Some(job) = buckets.iter_mut().find_map(|bucket| bucket.pop_front()) else {
            break;
        };
        plan.push(Assignment {
            worker_id: worker.id,
            job_id: job.id,
        });
    }
    plan
}

impl Supervisor {
    /// Run one assignment pass. Never fails; errors are logged and swallowed.
    pub fn run_assignment_pass(self: &Arc<Self>) -> BoxFuture<'static, PassSummary> {
        let this = Arc::clone(self);
        async move {
            match this.assignment_pass().await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "Assignment pass failed");
                    PassSummary::default()
                }
            }
        }
        .boxed()
    }

    async fn assignment_pass(self: &Arc<Self>) -> Result<PassSummary> {
        let workers = self
            .workers()
            .list_by_status(WorkerStatus::Available)
            .await?;
        if workers.is_empty() {
            debug!("No available workers");
            return Ok(PassSummary::default());
        }
        let due = self.jobs().list_due(Utc::now()).await?;
        if due.is_empty() {
            debug!(workers = workers.len(), "No due jobs");
            return Ok(PassSummary::default());
        }

        let mut plan = plan_assignments(&workers, due);
        if self.config().gate_scope == GateScope::Execution {
            // No more pairings than free gate units.
            plan.truncate(self.available_permits());
        }
        if plan.is_empty() {
            return Ok(PassSummary::default());
        }

        let attempts = plan.iter().map(|a| {
            let this = Arc::clone(self);
            let Assignment { worker_id, job_id } = *a;
            tokio::spawn(async move { this.attempt_assign(worker_id, job_id).await })
        });

        let mut summary = PassSummary::default();
        for (assignment, result) in plan.iter().zip(join_all(attempts).await) {
            match result {
                Ok(Ok(())) => summary.assigned += 1,
                Ok(Err(e)) => {
                    summary.rejected += 1;
                    debug!(worker_id = %assignment.worker_id, job_id = %assignment.job_id, error = %e, "Attempt rejected");
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!(worker_id = %assignment.worker_id, job_id = %assignment.job_id, error = %e, "Attempt task aborted");
                }
            }
        }

        if summary.assigned > 0 || summary.rejected > 0 {
            info!(
                assigned = summary.assigned,
                rejected = summary.rejected,
                "Assignment pass finished"
            );
        }
        Ok(summary)
    }
}
