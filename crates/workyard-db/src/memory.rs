//! In-memory repositories.
//!
//! Used for local development without PostgreSQL and by tests. Records keep
//! insertion order, and conditional updates are checked and applied under a
//! single write lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use workyard_core::{Job, JobStatus, ResourceId, Worker, WorkerStatus};

use crate::{DbError, DbResult, JobRepo, WorkerRepo};

#[derive(Default)]
pub struct MemoryJobRepo {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepo for MemoryJobRepo {
    async fn create(&self, job: &Job) -> DbResult<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(DbError::Duplicate(format!("job {}", job.id)));
        }
        jobs.push(job.clone());
        Ok(job.clone())
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Job> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        Ok(self.jobs.read().await.clone())
    }

    async fn list_by_status(&self, status: JobStatus) -> DbResult<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> DbResult<Vec<Job>> {
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        // Stable: equal schedule times keep insertion order.
        due.sort_by_key(|j| j.scheduled_start_time);
        Ok(due)
    }

    async fn update(&self, job: &Job) -> DbResult<()> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", job.id)))?;
        *slot = job.clone();
        Ok(())
    }

    async fn update_if(&self, job: &Job, expected: JobStatus) -> DbResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(slot) if slot.status == expected => {
                *slot = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(DbError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWorkerRepo {
    workers: RwLock<Vec<Worker>>,
}

impl MemoryWorkerRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepo for MemoryWorkerRepo {
    async fn create(&self, worker: &Worker) -> DbResult<Worker> {
        let mut workers = self.workers.write().await;
        if workers.iter().any(|w| w.id == worker.id) {
            return Err(DbError::Duplicate(format!("worker {}", worker.id)));
        }
        workers.push(worker.clone());
        Ok(worker.clone())
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Worker> {
        self.workers
            .read()
            .await
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("worker {}", id)))
    }

    async fn list(&self) -> DbResult<Vec<Worker>> {
        Ok(self.workers.read().await.clone())
    }

    async fn list_by_status(&self, status: WorkerStatus) -> DbResult<Vec<Worker>> {
        Ok(self
            .workers
            .read()
            .await
            .iter()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }

    async fn update(&self, worker: &Worker) -> DbResult<()> {
        let mut workers = self.workers.write().await;
        let slot = workers
            .iter_mut()
            .find(|w| w.id == worker.id)
            .ok_or_else(|| DbError::NotFound(format!("worker {}", worker.id)))?;
        *slot = worker.clone();
        Ok(())
    }

    async fn update_if(
        &self,
        worker: &Worker,
        expected_status: WorkerStatus,
        expected_job: Option<ResourceId>,
    ) -> DbResult<bool> {
        let mut workers = self.workers.write().await;
        match workers.iter_mut().find(|w| w.id == worker.id) {
            Some(slot) if slot.status == expected_status && slot.current_job_id == expected_job => {
                *slot = worker.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
