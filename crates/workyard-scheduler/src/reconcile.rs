//! Repair of worker/job pairs left inconsistent by a crash between the two
//! writes of an assignment, or by a shutdown that cancelled running jobs.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use workyard_core::{JobStatus, ResourceId, Result, WorkerStatus};

use crate::supervisor::Supervisor;

const INTERRUPTED_MESSAGE: &str = "execution interrupted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Busy workers whose job was not running on them.
    pub workers_freed: usize,
    /// In-progress jobs no run in this process owned.
    pub jobs_failed: usize,
}

impl Supervisor {
    /// Free orphaned busy workers and fail orphaned in-progress jobs.
    ///
    /// Anything owned by an attempt or run tracked here is left alone. The
    /// store is read before the tracked set is snapshotted, so an attempt that
    /// starts in between is always seen as tracked.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let busy = self.workers().list_by_status(WorkerStatus::Busy).await?;
        let running = self.jobs().list_by_status(JobStatus::InProgress).await?;
        let (tracked_jobs, tracked_workers) = self.registry().tracked();

        let mut report = ReconcileReport::default();

        let running_on: HashMap<ResourceId, ResourceId> = running
            .iter()
            .filter_map(|job| job.worker_id.map(|worker_id| (job.id, worker_id)))
            .collect();
        for worker in &busy {
            if tracked_workers.contains(&worker.id) {
                continue;
            }
            let Some(job_id) = worker.current_job_id else {
                continue;
            };
            if running_on.get(&job_id) == Some(&worker.id) {
                continue;
            }
            if self.release_worker(worker.id, job_id).await {
                warn!(worker_id = %worker.id, %job_id, "Freed worker holding a job that is not running on it");
                report.workers_freed += 1;
            }
        }

        for mut job in running {
            if tracked_jobs.contains(&job.id) {
                continue;
            }
            let job_id = job.id;
            job.fail(INTERRUPTED_MESSAGE, Utc::now());
            if !self.jobs().update_if(&job, JobStatus::InProgress).await? {
                continue;
            }
            self.events().job_updated(&job);
            warn!(%job_id, "Failed in-progress job with no active run");
            report.jobs_failed += 1;

            if let Some(worker_id) = job.worker_id {
                if self.release_worker(worker_id, job_id).await {
                    report.workers_freed += 1;
                }
            }
        }

        if report != ReconcileReport::default() {
            info!(
                workers_freed = report.workers_freed,
                jobs_failed = report.jobs_failed,
                "Reconciliation repaired state"
            );
        }
        Ok(report)
    }
}
