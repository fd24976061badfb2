//! Worker entity.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[display("available")]
    Available,
    #[display("busy")]
    Busy,
    #[display("offline")]
    Offline,
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(WorkerStatus::Available),
            "busy" => Ok(WorkerStatus::Busy),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(Error::InvalidInput(format!("unknown worker status: {}", other))),
        }
    }
}

/// Something that executes one job at a time.
///
/// `current_job_id` is set exactly when the worker is `Busy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: ResourceId,
    pub name: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<ResourceId>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            status: WorkerStatus::Available,
            current_job_id: None,
        }
    }

    pub fn assign(&mut self, job_id: ResourceId) {
        self.status = WorkerStatus::Busy;
        self.current_job_id = Some(job_id);
    }

    pub fn release(&mut self) {
        self.status = WorkerStatus::Available;
        self.current_job_id = None;
    }

    pub fn is_busy_with(&self, job_id: ResourceId) -> bool {
        self.status == WorkerStatus::Busy && self.current_job_id == Some(job_id)
    }
}
