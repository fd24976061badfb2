//! Execution supervisor.
//!
//! An attempt moves one (worker, job) pair from idle to active behind the
//! concurrency gate. A successful attempt spawns a run task that advances the
//! job's progress tick by tick until it completes, is stopped, or faults.
//!
//! Every write made on behalf of an attempt or run is conditional on the state
//! that attempt observed, so overlapping passes, stops and stale runs can only
//! lose a race, never corrupt the store.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use workyard_config::{GateScope, SchedulerConfig};
use workyard_core::{Error, Job, JobStatus, ResourceId, Result, Worker, WorkerStatus};
use workyard_db::{DbError, JobRepo, WorkerRepo};
use workyard_events::EventBus;

use crate::registry::{InFlight, RunRegistry, RunTicket};

/// How a run phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// Reached the last tick; the job was completed if still in progress.
    Finished,
    /// The job left `InProgress` or vanished underneath the run.
    Interrupted,
    /// The run's cancellation handle fired. Whoever fired it owns the job.
    Cancelled,
}

pub struct Supervisor {
    jobs: Arc<dyn JobRepo>,
    workers: Arc<dyn WorkerRepo>,
    events: Arc<EventBus>,
    config: SchedulerConfig,
    gate: Arc<Semaphore>,
    registry: RunRegistry,
}

impl Supervisor {
    pub fn new(
        jobs: Arc<dyn JobRepo>,
        workers: Arc<dyn WorkerRepo>,
        events: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let gate = Arc::new(Semaphore::new(config.concurrency_limit));
        Arc::new(Self {
            jobs,
            workers,
            events,
            config,
            gate,
            registry: RunRegistry::new(),
        })
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepo> {
        &self.jobs
    }

    pub fn workers(&self) -> &Arc<dyn WorkerRepo> {
        &self.workers
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Gate units not currently held.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Every job currently owned by an attempt or a run.
    pub fn in_flight(&self) -> Vec<InFlight> {
        self.registry.in_flight()
    }

    /// Signal the run owning `job_id` to exit without further writes.
    pub fn cancel_run(&self, job_id: ResourceId) -> bool {
        self.registry.cancel(job_id)
    }

    /// Move `worker_id` onto `job_id` and launch the run phase.
    ///
    /// Waits for a gate unit first. Fails with `NotFound` if either entity is
    /// gone and with `InvalidState` if the worker is not available or the job
    /// is not pending, including when a concurrent attempt wins the race.
    pub async fn attempt_assign(
        self: &Arc<Self>,
        worker_id: ResourceId,
        job_id: ResourceId,
    ) -> Result<()> {
        let permit = Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("concurrency gate is closed".to_string()))?;

        let worker = self.workers.get_by_id(worker_id).await?;
        let job = self.jobs.get_by_id(job_id).await?;
        if worker.status != WorkerStatus::Available {
            return Err(Error::InvalidState(format!(
                "worker {} is {}, not available",
                worker_id, worker.status
            )));
        }
        if job.status != JobStatus::Pending {
            return Err(Error::InvalidState(format!(
                "job {} is {}, not pending",
                job_id, job.status
            )));
        }

        let ticket = self.registry.register(job_id, worker_id)?;
        let (worker, job) = match self.transition(worker, job).await {
            Ok(pair) => pair,
            Err(e) => {
                self.rollback(worker_id, job_id).await;
                self.registry.unregister(&ticket);
                warn!(%worker_id, %job_id, error = %e, "Assignment attempt failed");
                return Err(e);
            }
        };

        self.events.worker_updated(&worker);
        self.events.job_updated(&job);
        info!(%worker_id, %job_id, job = %job.name, priority = %job.priority, "Assigned job to worker");

        let held = match self.config.gate_scope {
            GateScope::Transition => {
                drop(permit);
                None
            }
            GateScope::Execution => Some(permit),
        };

        let task = tokio::spawn(Arc::clone(self).run(ticket.clone(), held));
        self.registry.attach(&ticket, task);
        Ok(())
    }

    /// Mark the worker busy and the job in progress, both conditionally.
    async fn transition(&self, mut worker: Worker, mut job: Job) -> Result<(Worker, Job)> {
        worker.assign(job.id);
        if !self
            .workers
            .update_if(&worker, WorkerStatus::Available, None)
            .await?
        {
            return Err(Error::InvalidState(format!(
                "worker {} was claimed by another attempt",
                worker.id
            )));
        }

        job.begin(worker.id, Utc::now());
        if !self.jobs.update_if(&job, JobStatus::Pending).await? {
            return Err(Error::InvalidState(format!(
                "job {} left pending during assignment",
                job.id
            )));
        }
        Ok((worker, job))
    }

    /// Undo whatever part of a failed transition landed.
    async fn rollback(&self, worker_id: ResourceId, job_id: ResourceId) {
        match self.jobs.get_by_id(job_id).await {
            Ok(mut job) if job.status == JobStatus::InProgress && job.worker_id == Some(worker_id) => {
                job.status = JobStatus::Pending;
                job.actual_start_time = None;
                job.progress = 0;
                job.worker_id = None;
                match self.jobs.update_if(&job, JobStatus::InProgress).await {
                    Ok(true) => self.events.job_updated(&job),
                    Ok(false) => {}
                    Err(e) => error!(%job_id, error = %e, "Failed to roll back job"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%job_id, error = %e, "Could not read job for rollback"),
        }
        self.release_worker(worker_id, job_id).await;
    }

    /// Free `worker_id` if it is still busy with `job_id`.
    ///
    /// Returns `true` if the worker was released by this call.
    pub async fn release_worker(&self, worker_id: ResourceId, job_id: ResourceId) -> bool {
        let mut worker = match self.workers.get_by_id(worker_id).await {
            Ok(worker) => worker,
            Err(e) => {
                warn!(%worker_id, error = %e, "Could not read worker to release it");
                return false;
            }
        };
        if !worker.is_busy_with(job_id) {
            debug!(%worker_id, %job_id, status = %worker.status, "Worker no longer holds job, leaving it");
            return false;
        }
        worker.release();
        match self
            .workers
            .update_if(&worker, WorkerStatus::Busy, Some(job_id))
            .await
        {
            Ok(true) => {
                self.events.worker_updated(&worker);
                debug!(%worker_id, %job_id, "Released worker");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(%worker_id, %job_id, error = %e, "Failed to release worker");
                false
            }
        }
    }

    async fn run(self: Arc<Self>, ticket: RunTicket, permit: Option<OwnedSemaphorePermit>) {
        let (job_id, worker_id) = (ticket.job_id, ticket.worker_id);

        let result = AssertUnwindSafe(self.drive(job_id, &ticket.cancel))
            .catch_unwind()
            .await;

        let free_worker = match result {
            Ok(Ok(RunOutcome::Cancelled)) => {
                debug!(%job_id, "Run cancelled");
                false
            }
            Ok(Ok(outcome)) => {
                debug!(%job_id, ?outcome, "Run ended");
                true
            }
            Ok(Err(e)) if !ticket.cancel.is_cancelled() => {
                self.fail_job(job_id, format!("Execution error: {}", e)).await;
                true
            }
            Err(panic) if !ticket.cancel.is_cancelled() => {
                self.fail_job(job_id, format!("Execution error: {}", panic_message(&*panic)))
                    .await;
                true
            }
            Ok(Err(e)) => {
                warn!(%job_id, error = %e, "Run faulted after cancellation");
                false
            }
            Err(_) => {
                warn!(%job_id, "Run panicked after cancellation");
                false
            }
        };

        if free_worker {
            self.release_worker(worker_id, job_id).await;
        }
        self.registry.unregister(&ticket);

        // A returned gate unit can admit a waiting job even if no worker was freed.
        let freed_unit = permit.is_some() && !self.gate.is_closed();
        drop(permit);

        if free_worker || freed_unit {
            self.run_assignment_pass().await;
        }
    }

    async fn drive(
        &self,
        job_id: ResourceId,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<RunOutcome> {
        let step = self.config.progress_step.max(1) as usize;
        for progress in (0..=100).step_by(step) {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let mut job = match self.jobs.get_by_id(job_id).await {
                Ok(job) => job,
                Err(DbError::NotFound(_)) => return Ok(RunOutcome::Interrupted),
                Err(e) => return Err(e.into()),
            };
            if job.status != JobStatus::InProgress {
                debug!(%job_id, status = %job.status, "Job left in-progress, ending run");
                return Ok(RunOutcome::Interrupted);
            }

            job.progress = progress;
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if !self.jobs.update_if(&job, JobStatus::InProgress).await? {
                return Ok(RunOutcome::Interrupted);
            }
            self.events.job_updated(&job);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        let mut job = match self.jobs.get_by_id(job_id).await {
            Ok(job) => job,
            Err(DbError::NotFound(_)) => return Ok(RunOutcome::Interrupted),
            Err(e) => return Err(e.into()),
        };
        if job.status == JobStatus::InProgress {
            job.complete(Utc::now());
            if self.jobs.update_if(&job, JobStatus::InProgress).await? {
                self.events.job_updated(&job);
                info!(%job_id, job = %job.name, "Job completed");
            }
        }
        Ok(RunOutcome::Finished)
    }

    /// Record a run fault on the job. A failure here leaves the job without a
    /// terminal status and is only logged.
    async fn fail_job(&self, job_id: ResourceId, message: String) {
        warn!(%job_id, error = %message, "Run faulted");
        let result = async {
            let mut job = self.jobs.get_by_id(job_id).await?;
            if job.status != JobStatus::InProgress {
                return Ok::<_, DbError>(None);
            }
            job.fail(message.clone(), Utc::now());
            Ok(self
                .jobs
                .update_if(&job, JobStatus::InProgress)
                .await?
                .then_some(job))
        }
        .await;

        match result {
            Ok(Some(job)) => self.events.job_updated(&job),
            Ok(None) => {}
            Err(e) => error!(
                critical = true,
                %job_id,
                fault = %message,
                error = %e,
                "Could not mark faulted job as failed; job left without terminal status"
            ),
        }
    }

    /// Cancel every run and wait for the run tasks to exit.
    ///
    /// Cancelled runs make no further writes, so their jobs stay in progress
    /// until the next reconciliation fails them.
    pub async fn shutdown(&self) {
        self.gate.close();
        let handles = self.registry.cancel_all();
        info!(runs = handles.len(), "Shutting down supervisor");
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Run task ended abnormally during shutdown");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "run panicked".to_string()
    }
}
