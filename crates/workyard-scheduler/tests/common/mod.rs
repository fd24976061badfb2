#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use workyard_config::SchedulerConfig;
use workyard_core::{Job, JobPriority, Worker};
use workyard_db::{JobRepo, MemoryJobRepo, MemoryWorkerRepo, WorkerRepo};
use workyard_events::EventBus;
use workyard_scheduler::{JobService, Supervisor};

/// Ticks fast enough that a whole run takes a few tens of milliseconds.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(5),
        ..SchedulerConfig::default()
    }
}

/// Ticks slowly enough that runs stay in progress for the whole test.
pub fn slow_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_secs(60),
        ..SchedulerConfig::default()
    }
}

pub struct Harness {
    pub jobs: Arc<dyn JobRepo>,
    pub workers: Arc<dyn WorkerRepo>,
    pub events: Arc<EventBus>,
    pub supervisor: Arc<Supervisor>,
    pub service: JobService,
}

impl Harness {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_repos(
            Arc::new(MemoryJobRepo::new()),
            Arc::new(MemoryWorkerRepo::new()),
            config,
        )
    }

    pub fn with_repos(
        jobs: Arc<dyn JobRepo>,
        workers: Arc<dyn WorkerRepo>,
        config: SchedulerConfig,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let supervisor = Supervisor::new(jobs.clone(), workers.clone(), events.clone(), config);
        let service = JobService::new(supervisor.clone());
        Self {
            jobs,
            workers,
            events,
            supervisor,
            service,
        }
    }

    /// Insert a job that became due a few seconds ago, `age` orders them.
    pub async fn due_job(&self, name: &str, priority: JobPriority, age_secs: i64) -> Job {
        let scheduled = Utc::now() - ChronoDuration::seconds(age_secs);
        self.jobs
            .create(&Job::new(name, priority, Some(scheduled)))
            .await
            .unwrap()
    }

    /// Insert a worker directly, without triggering a pass.
    pub async fn worker(&self, name: &str) -> Worker {
        self.workers.create(&Worker::new(name)).await.unwrap()
    }

    pub async fn job(&self, job: &Job) -> Job {
        self.jobs.get_by_id(job.id).await.unwrap()
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
