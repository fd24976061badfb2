//! Table of in-flight attempts and runs.
//!
//! An entry is inserted when an attempt passes its first guard and removed
//! exactly once, by the attempt that inserted it, when that attempt fails or
//! its run task ends. The lock is never held across an await point.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use workyard_core::{Error, ResourceId, Result};

struct RunEntry {
    attempt: u64,
    worker_id: ResourceId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Handle returned to the attempt that registered a job.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub job_id: ResourceId,
    pub worker_id: ResourceId,
    pub attempt: u64,
    pub cancel: CancellationToken,
}

/// Diagnostic view of one tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub job_id: ResourceId,
    pub worker_id: ResourceId,
    /// `false` while the attempt is still inside its transition.
    pub running: bool,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<ResourceId, RunEntry>>,
    next_attempt: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceId, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `job_id` for a new attempt on `worker_id`.
    ///
    /// Fails with `InvalidState` if another attempt or run already owns the job.
    pub fn register(&self, job_id: ResourceId, worker_id: ResourceId) -> Result<RunTicket> {
        let mut runs = self.lock();
        if let Some(existing) = runs.get(&job_id) {
            return Err(Error::InvalidState(format!(
                "job {} is already being handled on worker {}",
                job_id, existing.worker_id
            )));
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        runs.insert(
            job_id,
            RunEntry {
                attempt,
                worker_id,
                cancel: cancel.clone(),
                task: None,
            },
        );
        Ok(RunTicket {
            job_id,
            worker_id,
            attempt,
            cancel,
        })
    }

    /// Record the run task spawned for `ticket`.
    ///
    /// If the run already finished and unregistered itself the handle is
    /// simply dropped.
    pub fn attach(&self, ticket: &RunTicket, task: JoinHandle<()>) {
        let mut runs = self.lock();
        match runs.get_mut(&ticket.job_id) {
            Some(entry) if entry.attempt == ticket.attempt => entry.task = Some(task),
            _ => {}
        }
    }

    /// Remove the entry owned by `ticket`. Returns `false` if it was already gone.
    pub fn unregister(&self, ticket: &RunTicket) -> bool {
        let mut runs = self.lock();
        match runs.get(&ticket.job_id) {
            Some(entry) if entry.attempt == ticket.attempt => {
                runs.remove(&ticket.job_id);
                true
            }
            _ => false,
        }
    }

    /// Signal the cancellation handle of the run owning `job_id`, if any.
    pub fn cancel(&self, job_id: ResourceId) -> bool {
        match self.lock().get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Job ids and worker ids currently owned by an attempt or run.
    pub fn tracked(&self) -> (HashSet<ResourceId>, HashSet<ResourceId>) {
        let runs = self.lock();
        let jobs = runs.keys().copied().collect();
        let workers = runs.values().map(|e| e.worker_id).collect();
        (jobs, workers)
    }

    pub fn in_flight(&self) -> Vec<InFlight> {
        let mut list: Vec<InFlight> = self
            .lock()
            .iter()
            .map(|(job_id, entry)| InFlight {
                job_id: *job_id,
                worker_id: entry.worker_id,
                running: entry.task.is_some(),
            })
            .collect();
        list.sort_by_key(|f| f.job_id);
        list
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every tracked run and take their task handles.
    ///
    /// Entries stay in the table; each run removes its own entry as it exits.
    pub fn cancel_all(&self) -> Vec<JoinHandle<()>> {
        let mut runs = self.lock();
        runs.values_mut()
            .filter_map(|entry| {
                entry.cancel.cancel();
                entry.task.take()
            })
            .collect()
    }
}
