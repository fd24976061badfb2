//! Job entity and its state machine.
//!
//! ```text
//! Pending ──assign──▶ InProgress ──▶ Completed
//!    │                   │ └──────▶ Failed ──retry──▶ Pending
//!    └──────stop─────────┴──stop──▶ Stopped ──retry──▶ Pending
//! ```

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// Scheduling tier. Ordered so that `High < Regular < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    #[display("high")]
    High,
    #[default]
    #[display("regular")]
    Regular,
    #[display("low")]
    Low,
}

impl std::str::FromStr for JobPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(JobPriority::High),
            "regular" => Ok(JobPriority::Regular),
            "low" => Ok(JobPriority::Low),
            other => Err(Error::InvalidInput(format!("unknown job priority: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[display("pending")]
    Pending,
    #[display("in_progress")]
    InProgress,
    #[display("completed")]
    Completed,
    #[display("stopped")]
    Stopped,
    #[display("failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Stopped | JobStatus::Failed
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "stopped" => Ok(JobStatus::Stopped),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {}", other))),
        }
    }
}

/// A unit of work tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: ResourceId,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Earliest time the job may be picked up.
    pub scheduled_start_time: DateTime<Utc>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 0..=100
    pub progress: i32,
    pub retry_count: i32,
    /// Modeled but not enforced by `retry`.
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub worker_id: Option<ResourceId>,
}

impl Job {
    pub const DEFAULT_MAX_RETRIES: i32 = 3;

    /// Progress 100 is reserved for `Completed`; a stopped or failed job
    /// reports at most this.
    pub const MAX_UNFINISHED_PROGRESS: i32 = 99;

    /// Create a pending job. Without an explicit start time it is due immediately.
    pub fn new(
        name: impl Into<String>,
        priority: JobPriority,
        scheduled_start_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            priority,
            status: JobStatus::Pending,
            scheduled_start_time: scheduled_start_time.unwrap_or_else(Utc::now),
            actual_start_time: None,
            end_time: None,
            progress: 0,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            error_message: None,
            worker_id: None,
        }
    }

    /// Pending and scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_start_time <= now
    }

    /// Move into `InProgress` on `worker_id`.
    pub fn begin(&mut self, worker_id: ResourceId, now: DateTime<Utc>) {
        self.status = JobStatus::InProgress;
        self.actual_start_time = Some(now);
        self.progress = 0;
        self.worker_id = Some(worker_id);
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.end_time = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.progress = self.progress.min(Self::MAX_UNFINISHED_PROGRESS);
        self.end_time = Some(now);
        self.error_message = Some(message.into());
    }

    /// Stop a pending or running job.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "job {} is {}; only pending or in-progress jobs can be stopped",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Stopped;
        self.progress = self.progress.min(Self::MAX_UNFINISHED_PROGRESS);
        self.end_time = Some(now);
        Ok(())
    }

    /// Put a failed or stopped job back in the queue, scheduled for `now`.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            JobStatus::Failed | JobStatus::Stopped => {
                self.status = JobStatus::Pending;
                self.progress = 0;
                self.retry_count += 1;
                self.scheduled_start_time = now;
                self.error_message = None;
                self.actual_start_time = None;
                self.end_time = None;
                self.worker_id = None;
                Ok(())
            }
            status => Err(Error::InvalidState(format!(
                "job {} is {}; only failed or stopped jobs can be retried",
                self.id, status
            ))),
        }
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        if self.status == JobStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "job {} is in progress and cannot be deleted",
                self.id
            )));
        }
        Ok(())
    }
}
