//! Application state.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workyard_events::EventBus;
use workyard_scheduler::JobService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: JobService,
    pub events: Arc<EventBus>,
    /// Fired when the server is shutting down; long-lived handlers exit on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: JobService, shutdown: CancellationToken) -> Self {
        let events = service.supervisor().events().clone();
        Self {
            service,
            events,
            shutdown,
        }
    }
}
