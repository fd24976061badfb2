//! Job and worker lifecycle operations.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use workyard_core::{Error, Job, JobPriority, JobStatus, ResourceId, Result, Worker};

use crate::engine::PassSummary;
use crate::registry::InFlight;
use crate::supervisor::Supervisor;

/// How many times `stop` re-reads a job whose status moved underneath it.
const STOP_ATTEMPTS: usize = 3;

/// Entry point for callers outside the scheduler.
#[derive(Clone)]
pub struct JobService {
    supervisor: Arc<Supervisor>,
}

impl JobService {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub async fn create_job(
        &self,
        name: &str,
        priority: JobPriority,
        scheduled_start_time: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let name = validate_name("job", name)?;
        let job = self
            .supervisor
            .jobs()
            .create(&Job::new(name, priority, scheduled_start_time))
            .await?;
        self.supervisor.events().job_updated(&job);
        info!(job_id = %job.id, priority = %job.priority, scheduled = %job.scheduled_start_time, "Created job");
        Ok(job)
    }

    pub async fn get_job(&self, id: ResourceId) -> Result<Job> {
        Ok(self.supervisor.jobs().get_by_id(id).await?)
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let jobs = self.supervisor.jobs();
        Ok(match status {
            Some(status) => jobs.list_by_status(status).await?,
            None => jobs.list().await?,
        })
    }

    /// Stop a pending or running job.
    ///
    /// A running job's run is cancelled before its worker is freed, so no
    /// progress write from that run lands after the stop.
    pub async fn stop(&self, id: ResourceId) -> Result<Job> {
        for _ in 0..STOP_ATTEMPTS {
            let mut job = self.get_job(id).await?;
            let previous = job.status;
            job.stop(Utc::now())?;

            if !self.supervisor.jobs().update_if(&job, previous).await? {
                continue;
            }
            self.supervisor.cancel_run(id);
            self.supervisor.events().job_updated(&job);
            info!(job_id = %id, from = %previous, "Stopped job");

            if previous == JobStatus::InProgress {
                if let Some(worker_id) = job.worker_id {
                    self.supervisor.release_worker(worker_id, id).await;
                    tokio::spawn(self.supervisor.run_assignment_pass());
                }
            }
            return Ok(job);
        }
        Err(Error::InvalidState(format!(
            "job {} kept changing status while being stopped",
            id
        )))
    }

    /// Put a failed or stopped job back in the queue.
    pub async fn retry(&self, id: ResourceId) -> Result<Job> {
        let mut job = self.get_job(id).await?;
        let previous = job.status;
        job.reset_for_retry(Utc::now())?;
        if !self.supervisor.jobs().update_if(&job, previous).await? {
            return Err(Error::InvalidState(format!(
                "job {} changed status during retry",
                id
            )));
        }
        self.supervisor.events().job_updated(&job);
        info!(job_id = %id, retry_count = job.retry_count, "Retrying job");
        Ok(job)
    }

    pub async fn delete(&self, id: ResourceId) -> Result<()> {
        let job = self.get_job(id).await?;
        job.ensure_deletable()?;
        self.supervisor.jobs().delete(id).await?;
        self.supervisor.events().job_deleted(id);
        info!(job_id = %id, "Deleted job");
        Ok(())
    }

    /// Add an available worker and run a pass for it in the background.
    pub async fn register_worker(&self, name: &str) -> Result<Worker> {
        let name = validate_name("worker", name)?;
        let worker = self.supervisor.workers().create(&Worker::new(name)).await?;
        self.supervisor.events().worker_updated(&worker);
        info!(worker_id = %worker.id, name = %worker.name, "Registered worker");
        tokio::spawn(self.supervisor.run_assignment_pass());
        Ok(worker)
    }

    pub async fn get_worker(&self, id: ResourceId) -> Result<Worker> {
        Ok(self.supervisor.workers().get_by_id(id).await?)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self.supervisor.workers().list().await?)
    }

    /// Run an assignment pass now and wait for it.
    pub async fn process_queue(&self) -> PassSummary {
        self.supervisor.run_assignment_pass().await
    }

    pub fn in_flight(&self) -> Vec<InFlight> {
        self.supervisor.in_flight()
    }
}

fn validate_name<'a>(kind: &str, name: &'a str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed)
}
