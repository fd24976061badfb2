//! Worker repository.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use workyard_core::{ResourceId, Worker, WorkerStatus};

use crate::{DbError, DbResult};

/// A worker row as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerRecord {
    pub id: uuid::Uuid,
    pub name: String,
    pub status: String,
    pub current_job_id: Option<uuid::Uuid>,
}

impl TryFrom<WorkerRecord> for Worker {
    type Error = DbError;

    fn try_from(record: WorkerRecord) -> DbResult<Self> {
        let status = record
            .status
            .parse()
            .map_err(|e| DbError::Corrupt(format!("worker {}: {}", record.id, e)))?;
        Ok(Worker {
            id: ResourceId::from_uuid(record.id),
            name: record.name,
            status,
            current_job_id: record.current_job_id.map(ResourceId::from_uuid),
        })
    }
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    async fn create(&self, worker: &Worker) -> DbResult<Worker>;
    async fn get_by_id(&self, id: ResourceId) -> DbResult<Worker>;
    /// All workers in registration order.
    async fn list(&self) -> DbResult<Vec<Worker>>;
    async fn list_by_status(&self, status: WorkerStatus) -> DbResult<Vec<Worker>>;
    async fn update(&self, worker: &Worker) -> DbResult<()>;
    /// Write `worker` only if the stored row still has `expected_status` and
    /// `expected_job` as its current job.
    async fn update_if(
        &self,
        worker: &Worker,
        expected_status: WorkerStatus,
        expected_job: Option<ResourceId>,
    ) -> DbResult<bool>;
}

/// PostgreSQL implementation of WorkerRepo.
pub struct PgWorkerRepo {
    pool: PgPool,
}

impl PgWorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_workers(records: Vec<WorkerRecord>) -> DbResult<Vec<Worker>> {
    records.into_iter().map(Worker::try_from).collect()
}

#[async_trait]
impl WorkerRepo for PgWorkerRepo {
    async fn create(&self, worker: &Worker) -> DbResult<Worker> {
        let record = sqlx::query_as::<_, WorkerRecord>(
            r#"
            INSERT INTO workers (id, name, status, current_job_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.name)
        .bind(worker.status.to_string())
        .bind(worker.current_job_id.map(uuid::Uuid::from))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("worker {}", worker.id))
            }
            other => DbError::Database(other),
        })?;
        tracing::info!(worker_id = %worker.id, "Added worker");
        record.try_into()
    }

    async fn get_by_id(&self, id: ResourceId) -> DbResult<Worker> {
        let record = sqlx::query_as::<_, WorkerRecord>("SELECT * FROM workers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("worker {}", id)))?;
        record.try_into()
    }

    async fn list(&self) -> DbResult<Vec<Worker>> {
        let records = sqlx::query_as::<_, WorkerRecord>("SELECT * FROM workers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        into_workers(records)
    }

    async fn list_by_status(&self, status: WorkerStatus) -> DbResult<Vec<Worker>> {
        let records = sqlx::query_as::<_, WorkerRecord>(
            "SELECT * FROM workers WHERE status = $1 ORDER BY id",
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        into_workers(records)
    }

    async fn update(&self, worker: &Worker) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE workers SET name = $2, status = $3, current_job_id = $4 WHERE id = $1",
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.name)
        .bind(worker.status.to_string())
        .bind(worker.current_job_id.map(uuid::Uuid::from))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("worker {}", worker.id)));
        }
        tracing::debug!(worker_id = %worker.id, status = %worker.status, "Updated worker");
        Ok(())
    }

    async fn update_if(
        &self,
        worker: &Worker,
        expected_status: WorkerStatus,
        expected_job: Option<ResourceId>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET name = $2, status = $3, current_job_id = $4
            WHERE id = $1 AND status = $5 AND current_job_id IS NOT DISTINCT FROM $6
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.name)
        .bind(worker.status.to_string())
        .bind(worker.current_job_id.map(uuid::Uuid::from))
        .bind(expected_status.to_string())
        .bind(expected_job.map(uuid::Uuid::from))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
