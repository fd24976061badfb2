//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use workyard_core::{Job, JobStatus, ResourceId};

use crate::{DbError, DbResult};

/// A job row as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub priority: String,
    pub status: String,
    pub scheduled_start_time: DateTime<Utc>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub worker_id: Option<uuid::Uuid>,
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> DbResult<Self> {
        let corrupt = |e: workyard_core::Error| DbError::Corrupt(format!("job {}: {}", record.id, e));
        let priority = record.priority.parse().map_err(corrupt)?;
        let status = record.status.parse().map_err(corrupt)?;
        Ok(Job {
            id: ResourceId::from_uuid(record.id),
            name: record.name,
            priority,
            status,
            scheduled_start_time: record.scheduled_start_time,
            actual_start_time: record.actual_start_time,
            end_time: record.end_time,
            progress: record.progress,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            error_message: record.error_message,
            worker_id: record.worker_id.map(ResourceId::from_uuid),
        })
    }
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, job: &Job) -> DbResult<Job>;
    async fn get_by_id(&self, id: ResourceId) -> DbResult<Job>;
    async fn list(&self) -> DbResult<Vec<Job>>;
    async fn list_by_status(&self, status: JobStatus) -> DbResult<Vec<Job>>;
    /// Pending jobs scheduled at or before `now`, earliest first.
    async fn list_due(&self, now: DateTime<Utc>) -> DbResult<Vec<Job>>;
    async fn update(&self, job: &Job) -> DbResult<()>;
    /// Write `job` only if the stored status is still `expected`.
    async fn update_if(&self, job: &Job, expected: JobStatus) -> DbResult<bool>;
    async fn delete(&self, id: ResourceId) -> DbResult<()>;
}

/// PostgreSQL implementation of JobRepo.
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UPDATE_JOB: &str = r#"
    UPDATE jobs SET name = $2, priority = $3, status = $4, scheduled_start_time = $5,
        actual_start_time = $6, end_time = $7, progress = $8, retry_count = $9,
        max_retries = $10, error_message = $11, worker_id = $12
    WHERE id = $1
"#;

/// Bind every job column in table order as `$1..=$12`.
fn bind_job<'q>(
    query: Query<'q, Postgres, PgArguments>,
    job: &'q Job,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(job.id.as_uuid())
        .bind(&job.name)
        .bind(job.priority.to_string())
        .bind(job.status.to_string())
        .bind(job.scheduled_start_time)
        .bind(job.actual_start_time)
        .bind(job.end_time)
        .bind(job.progress)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.error_message.as_deref())
        .bind(job.worker_id.map(uuid::Uuid::from))
}

fn into_jobs(records: Vec<JobRecord>) -> DbResult<Vec<Job>> {
    records.into_iter().map(Job::try_from).collect()
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create(&self, job: &Job) -> DbResult<Job> {
        bind_job(
            sqlx::query(
                r#"
                INSERT INTO jobs (id, name, priority, status, scheduled_start_time,
                    actual_start_time, end_time, progress, retry_count, max_retries,
                    error_message, worker_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            ),
            job,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("job {}", job.id))
            }
            other => DbError::Database(other),
        })?;
        tracing::info!(job_id = %job.id, priority = %job.priority, "Added job");
        Ok(job.clone())
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Job> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        record.try_into()
    }

    async fn list(&self) -> DbResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        into_jobs(records)
    }

    async fn list_by_status(&self, status: JobStatus) -> DbResult<Vec<Job>> {
        let records =
            sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE status = $1 ORDER BY id")
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await?;
        into_jobs(records)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> DbResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE status = $1 AND scheduled_start_time <= $2
            ORDER BY scheduled_start_time, id
            "#,
        )
        .bind(JobStatus::Pending.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        into_jobs(records)
    }

    async fn update(&self, job: &Job) -> DbResult<()> {
        let result = bind_job(sqlx::query(UPDATE_JOB), job)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("job {}", job.id)));
        }
        tracing::debug!(job_id = %job.id, status = %job.status, progress = job.progress, "Updated job");
        Ok(())
    }

    async fn update_if(&self, job: &Job, expected: JobStatus) -> DbResult<bool> {
        let sql = format!("{} AND status = $13", UPDATE_JOB.trim_end());
        let result = bind_job(sqlx::query(&sql), job)
            .bind(expected.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: ResourceId) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("job {}", id)));
        }
        tracing::info!(job_id = %id, "Deleted job");
        Ok(())
    }
}
