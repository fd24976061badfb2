//! Entity change notifications for Workyard.
//!
//! [`EventBus`] fans out [`EntityEvent`]s to every subscriber over a
//! `tokio::sync::broadcast` channel. Publishing is fire-and-forget: it never
//! blocks and never fails the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use workyard_core::{Job, ResourceId, Worker};

/// Channel name for job events.
pub const JOBS_CHANNEL: &str = "jobs";
/// Channel name for worker events.
pub const WORKERS_CHANNEL: &str = "workers";

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// A change to a job or worker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EntityEvent {
    JobUpdated(Job),
    JobDeleted { id: ResourceId },
    WorkerUpdated(Worker),
}

impl EntityEvent {
    /// The subscription channel this event is delivered on.
    pub fn channel(&self) -> &'static str {
        match self {
            EntityEvent::JobUpdated(_) | EntityEvent::JobDeleted { .. } => JOBS_CHANNEL,
            EntityEvent::WorkerUpdated(_) => WORKERS_CHANNEL,
        }
    }
}

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest events are dropped and slow receivers
/// observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<EntityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EntityEvent) {
        let channel = event.channel();
        if self.sender.send(event).is_err() {
            tracing::debug!(channel, "No subscribers, dropping event");
        }
    }

    pub fn job_updated(&self, job: &Job) {
        tracing::debug!(job_id = %job.id, status = %job.status, progress = job.progress, "Publishing job update");
        self.publish(EntityEvent::JobUpdated(job.clone()));
    }

    pub fn job_deleted(&self, id: ResourceId) {
        self.publish(EntityEvent::JobDeleted { id });
    }

    pub fn worker_updated(&self, worker: &Worker) {
        tracing::debug!(worker_id = %worker.id, status = %worker.status, "Publishing worker update");
        self.publish(EntityEvent::WorkerUpdated(worker.clone()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
