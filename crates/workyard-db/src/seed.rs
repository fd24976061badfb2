//! Sample data for fresh installations.

use chrono::{Duration, Utc};
use workyard_core::{Job, JobPriority, Worker};

use crate::{DbResult, JobRepo, WorkerRepo};

/// Insert sample jobs and workers when the store holds neither.
///
/// Returns `true` if anything was inserted.
pub async fn seed_if_empty(jobs: &dyn JobRepo, workers: &dyn WorkerRepo) -> DbResult<bool> {
    if !jobs.list().await?.is_empty() || !workers.list().await?.is_empty() {
        return Ok(false);
    }

    let now = Utc::now();
    let sample_jobs = [
        Job::new("Sample High Priority Job", JobPriority::High, Some(now)),
        Job::new("Sample Regular Priority Job", JobPriority::Regular, Some(now)),
        Job::new(
            "Sample Future Job",
            JobPriority::High,
            Some(now + Duration::hours(2)),
        ),
        Job::new("Sample Low Priority Job", JobPriority::Low, Some(now)),
    ];
    for job in &sample_jobs {
        jobs.create(job).await?;
    }

    for name in ["Worker 1", "Worker 2", "Worker 3"] {
        workers.create(&Worker::new(name)).await?;
    }

    tracing::info!(
        jobs = sample_jobs.len(),
        workers = 3,
        "Seeded sample jobs and workers"
    );
    Ok(true)
}
