mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{Harness, fast_config, slow_config, wait_until};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use workyard_config::{GateScope, SchedulerConfig};
use workyard_core::{Error, Job, JobPriority, JobStatus, ResourceId, Worker, WorkerStatus};
use workyard_db::{
    DbError, DbResult, JobRepo, MemoryJobRepo, MemoryWorkerRepo, WorkerRepo,
};
use workyard_events::EntityEvent;

#[tokio::test]
async fn high_priority_jobs_take_both_workers() {
    let h = Harness::new(slow_config());
    let w1 = h.worker("w1").await;
    let w2 = h.worker("w2").await;
    let regular = h.due_job("regular", JobPriority::Regular, 30).await;
    let high1 = h.due_job("high-1", JobPriority::High, 20).await;
    let high2 = h.due_job("high-2", JobPriority::High, 10).await;

    let summary = h.service.process_queue().await;
    assert_eq!(summary.assigned, 2);

    let high1 = h.job(&high1).await;
    let high2 = h.job(&high2).await;
    assert_eq!(high1.status, JobStatus::InProgress);
    assert_eq!(high1.worker_id, Some(w1.id));
    assert_eq!(high2.status, JobStatus::InProgress);
    assert_eq!(high2.worker_id, Some(w2.id));
    assert_eq!(h.job(&regular).await.status, JobStatus::Pending);

    let busy = h.workers.list_by_status(WorkerStatus::Busy).await.unwrap();
    assert_eq!(busy.len(), 2);
    assert!(busy.iter().all(|w| w.current_job_id.is_some()));

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn future_job_is_not_selected() {
    let h = Harness::new(slow_config());
    h.worker("w1").await;
    let later = h
        .jobs
        .create(&Job::new(
            "later",
            JobPriority::High,
            Some(Utc::now() + ChronoDuration::hours(1)),
        ))
        .await
        .unwrap();

    let summary = h.service.process_queue().await;
    assert_eq!(summary.assigned, 0);
    assert_eq!(h.job(&later).await.status, JobStatus::Pending);
    assert!(h.supervisor.in_flight().is_empty());
}

#[tokio::test]
async fn attempt_rejects_busy_worker() {
    let h = Harness::new(slow_config());
    let worker = h.worker("w1").await;
    let first = h.due_job("first", JobPriority::Regular, 10).await;
    let second = h.due_job("second", JobPriority::Regular, 5).await;

    h.supervisor.attempt_assign(worker.id, first.id).await.unwrap();
    let err = h
        .supervisor
        .attempt_assign(worker.id, second.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(h.job(&second).await.status, JobStatus::Pending);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn attempt_on_missing_entities_is_not_found() {
    let h = Harness::new(slow_config());
    let worker = h.worker("w1").await;
    let job = h.due_job("j", JobPriority::Regular, 1).await;

    let err = h
        .supervisor
        .attempt_assign(ResourceId::new(), job.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = h
        .supervisor
        .attempt_assign(worker.id, ResourceId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(
        h.workers.get_by_id(worker.id).await.unwrap().status,
        WorkerStatus::Available
    );
}

#[tokio::test]
async fn concurrent_attempts_on_one_worker_admit_exactly_one() {
    let h = Harness::new(slow_config());
    let worker = h.worker("w1").await;
    let a = h.due_job("a", JobPriority::Regular, 10).await;
    let b = h.due_job("b", JobPriority::Regular, 5).await;

    let (ra, rb) = tokio::join!(
        h.supervisor.attempt_assign(worker.id, a.id),
        h.supervisor.attempt_assign(worker.id, b.id),
    );
    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(Error::InvalidState(_))))
    );

    let worker = h.workers.get_by_id(worker.id).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Busy);
    let running = h.jobs.list_by_status(JobStatus::InProgress).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(worker.current_job_id, Some(running[0].id));

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn overlapping_passes_leave_worker_with_one_job() {
    let h = Harness::new(slow_config());
    let worker = h.worker("w1").await;
    h.due_job("a", JobPriority::High, 10).await;
    h.due_job("b", JobPriority::Low, 5).await;

    let (s1, s2) = tokio::join!(
        h.supervisor.run_assignment_pass(),
        h.supervisor.run_assignment_pass(),
    );
    assert_eq!(s1.assigned + s2.assigned, 1);
    assert_eq!(s1.rejected + s2.rejected, 1);

    let worker = h.workers.get_by_id(worker.id).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Busy);
    let running = h.jobs.list_by_status(JobStatus::InProgress).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(worker.current_job_id, Some(running[0].id));
    assert_eq!(h.jobs.list_by_status(JobStatus::Pending).await.unwrap().len(), 1);

    h.supervisor.shutdown().await;
}

/// Worker store that records how many `get_by_id` calls overlap.
struct CountingWorkerRepo {
    inner: MemoryWorkerRepo,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl WorkerRepo for CountingWorkerRepo {
    async fn create(&self, worker: &Worker) -> DbResult<Worker> {
        self.inner.create(worker).await
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Worker> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn list(&self) -> DbResult<Vec<Worker>> {
        self.inner.list().await
    }

    async fn list_by_status(&self, status: WorkerStatus) -> DbResult<Vec<Worker>> {
        self.inner.list_by_status(status).await
    }

    async fn update(&self, worker: &Worker) -> DbResult<()> {
        self.inner.update(worker).await
    }

    async fn update_if(
        &self,
        worker: &Worker,
        expected_status: WorkerStatus,
        expected_job: Option<ResourceId>,
    ) -> DbResult<bool> {
        self.inner
            .update_if(worker, expected_status, expected_job)
            .await
    }
}

#[tokio::test]
async fn gate_bounds_attempts_in_transition() {
    let workers = Arc::new(CountingWorkerRepo {
        inner: MemoryWorkerRepo::new(),
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let config = SchedulerConfig {
        concurrency_limit: 2,
        ..slow_config()
    };
    let h = Harness::with_repos(Arc::new(MemoryJobRepo::new()), workers.clone(), config);
    for i in 0..6 {
        h.worker(&format!("w{}", i)).await;
        h.due_job(&format!("j{}", i), JobPriority::Regular, 10).await;
    }

    let summary = h.service.process_queue().await;
    assert_eq!(summary.assigned, 6);
    assert!(workers.peak.load(Ordering::SeqCst) <= 2);
    // Transition scope hands the unit back before the run starts.
    assert_eq!(h.supervisor.available_permits(), 2);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn execution_scope_limits_running_jobs() {
    let config = SchedulerConfig {
        concurrency_limit: 2,
        gate_scope: GateScope::Execution,
        ..slow_config()
    };
    let h = Harness::new(config);
    for i in 0..4 {
        h.worker(&format!("w{}", i)).await;
    }
    let mut jobs = Vec::new();
    for i in 0..4 {
        jobs.push(h.due_job(&format!("j{}", i), JobPriority::Regular, 10 - i).await);
    }

    let summary = h.service.process_queue().await;
    assert_eq!(summary.assigned, 2);
    assert_eq!(h.supervisor.available_permits(), 0);
    assert_eq!(h.supervisor.in_flight().len(), 2);

    // Stopping one run hands its unit to the next pending job.
    h.service.stop(jobs[0].id).await.unwrap();
    assert!(
        wait_until(|| async {
            h.jobs
                .list_by_status(JobStatus::InProgress)
                .await
                .unwrap()
                .len()
                == 2
        })
        .await
    );
    assert_eq!(h.job(&jobs[0]).await.status, JobStatus::Stopped);
    assert_eq!(h.supervisor.in_flight().len(), 2);
    assert_eq!(h.supervisor.available_permits(), 0);

    h.supervisor.shutdown().await;
}

#[tokio::test]
async fn run_completes_and_frees_worker() {
    let h = Harness::new(fast_config());
    let worker = h.worker("w1").await;
    let job = h.due_job("j", JobPriority::Regular, 1).await;
    let mut events = h.events.subscribe();

    assert_eq!(h.service.process_queue().await.assigned, 1);
    assert!(wait_until(|| async { h.job(&job).await.status == JobStatus::Completed }).await);

    let job = h.job(&job).await;
    assert_eq!(job.progress, 100);
    assert!(job.end_time.is_some());
    assert!(job.actual_start_time.is_some());
    assert!(
        wait_until(|| async {
            h.workers.get_by_id(worker.id).await.unwrap().status == WorkerStatus::Available
        })
        .await
    );
    assert!(wait_until(|| async { h.supervisor.in_flight().is_empty() }).await);

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EntityEvent::JobUpdated(update) = event {
            if update.id == job.id && update.status == JobStatus::InProgress {
                progress.push(update.progress);
            }
        }
    }
    progress.dedup();
    assert_eq!(progress, (0..=100).step_by(10).collect::<Vec<i32>>());
}

#[tokio::test]
async fn freed_worker_picks_up_next_job() {
    let h = Harness::new(fast_config());
    h.worker("w1").await;
    let first = h.due_job("first", JobPriority::High, 10).await;
    let second = h.due_job("second", JobPriority::Low, 5).await;

    assert_eq!(h.service.process_queue().await.assigned, 1);
    assert!(
        wait_until(|| async {
            h.job(&first).await.status == JobStatus::Completed
                && h.job(&second).await.status == JobStatus::Completed
        })
        .await
    );
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// The progress write at this value fails.
    ProgressWrite(i32),
    /// Every write expecting `InProgress` fails until the store is healed.
    RunWrites,
    /// The first read of an in-progress job at this progress panics.
    PanicOnRead(i32),
}

/// Job store that injects one kind of fault into the run phase.
struct FaultyJobRepo {
    inner: MemoryJobRepo,
    fault: Fault,
    broken: AtomicBool,
}

impl FaultyJobRepo {
    fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryJobRepo::new(),
            fault,
            broken: AtomicBool::new(true),
        })
    }

    fn heal(&self) {
        self.broken.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRepo for FaultyJobRepo {
    async fn create(&self, job: &Job) -> DbResult<Job> {
        self.inner.create(job).await
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Job> {
        let job = self.inner.get_by_id(id).await?;
        if let Fault::PanicOnRead(at) = self.fault {
            if job.status == JobStatus::InProgress
                && job.progress == at
                && self.broken.swap(false, Ordering::SeqCst)
            {
                panic!("store connection poisoned");
            }
        }
        Ok(job)
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        self.inner.list().await
    }

    async fn list_by_status(&self, status: JobStatus) -> DbResult<Vec<Job>> {
        self.inner.list_by_status(status).await
    }

    async fn list_due(&self, now: chrono::DateTime<Utc>) -> DbResult<Vec<Job>> {
        self.inner.list_due(now).await
    }

    async fn update(&self, job: &Job) -> DbResult<()> {
        self.inner.update(job).await
    }

    async fn update_if(&self, job: &Job, expected: JobStatus) -> DbResult<bool> {
        match self.fault {
            Fault::ProgressWrite(at) if job.status == JobStatus::InProgress && job.progress == at => {
                Err(DbError::Corrupt("disk on fire".to_string()))
            }
            Fault::RunWrites
                if expected == JobStatus::InProgress && self.broken.load(Ordering::SeqCst) =>
            {
                Err(DbError::Corrupt("replica is read-only".to_string()))
            }
            _ => self.inner.update_if(job, expected).await,
        }
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn run_fault_fails_job_and_frees_worker() {
    let h = Harness::with_repos(
        FaultyJobRepo::new(Fault::ProgressWrite(30)),
        Arc::new(MemoryWorkerRepo::new()),
        fast_config(),
    );
    let worker = h.worker("w1").await;
    let job = h.due_job("j", JobPriority::Regular, 1).await;

    assert_eq!(h.service.process_queue().await.assigned, 1);
    assert!(wait_until(|| async { h.job(&job).await.status == JobStatus::Failed }).await);

    let job = h.job(&job).await;
    assert_eq!(job.progress, 20);
    assert!(job.end_time.is_some());
    let message = job.error_message.unwrap();
    assert!(message.starts_with("Execution error:"), "{}", message);
    assert!(message.contains("disk on fire"), "{}", message);
    assert!(
        wait_until(|| async {
            h.workers.get_by_id(worker.id).await.unwrap().status == WorkerStatus::Available
        })
        .await
    );
}

#[tokio::test]
async fn failed_fault_write_leaves_job_for_reconciliation() {
    let repo = FaultyJobRepo::new(Fault::RunWrites);
    let h = Harness::with_repos(repo.clone(), Arc::new(MemoryWorkerRepo::new()), fast_config());
    let worker = h.worker("w1").await;
    let job = h.due_job("j", JobPriority::Regular, 1).await;

    assert_eq!(h.service.process_queue().await.assigned, 1);
    assert!(wait_until(|| async { h.supervisor.in_flight().is_empty() }).await);

    // Neither the progress write nor the Failed write landed.
    let stuck = h.job(&job).await;
    assert_eq!(stuck.status, JobStatus::InProgress);
    assert_eq!(stuck.progress, 0);
    assert!(stuck.error_message.is_none());
    let worker = h.workers.get_by_id(worker.id).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Available);
    assert!(worker.current_job_id.is_none());

    repo.heal();
    let report = h.supervisor.reconcile().await.unwrap();
    assert_eq!(report.jobs_failed, 1);
    assert_eq!(report.workers_freed, 0);
    let job = h.job(&job).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("execution interrupted"));
}

#[tokio::test]
async fn panicking_run_fails_job() {
    let h = Harness::with_repos(
        FaultyJobRepo::new(Fault::PanicOnRead(20)),
        Arc::new(MemoryWorkerRepo::new()),
        fast_config(),
    );
    let worker = h.worker("w1").await;
    h.due_job("j", JobPriority::Regular, 1).await;

    // Listing never panics, unlike `get_by_id`.
    let failed = || async { h.jobs.list_by_status(JobStatus::Failed).await.unwrap() };
    assert_eq!(h.service.process_queue().await.assigned, 1);
    assert!(wait_until(|| async { !failed().await.is_empty() }).await);

    let job = failed().await.remove(0);
    assert_eq!(job.progress, 20);
    assert!(job.end_time.is_some());
    let message = job.error_message.unwrap();
    assert!(message.starts_with("Execution error:"), "{}", message);
    assert!(message.contains("store connection poisoned"), "{}", message);
    assert!(
        wait_until(|| async {
            h.workers.list_by_status(WorkerStatus::Available).await.unwrap().len() == 1
        })
        .await
    );
    assert!(wait_until(|| async { h.supervisor.in_flight().is_empty() }).await);
    assert!(h.workers.get_by_id(worker.id).await.unwrap().current_job_id.is_none());
}
