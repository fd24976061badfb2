//! Job scheduling for Workyard.
//!
//! The [`Supervisor`] owns the concurrency gate and the table of in-flight
//! runs. Assignment passes pair available workers with due jobs, each pairing
//! becomes a guarded attempt, and every successful attempt launches a tracked
//! run task. [`AssignmentTrigger`] drives passes and reconciliation on a timer,
//! and [`JobService`] exposes the lifecycle operations used by the API.

pub mod engine;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod trigger;

pub use engine::{Assignment, PassSummary, plan_assignments};
pub use reconcile::ReconcileReport;
pub use registry::{InFlight, RunRegistry, RunTicket};
pub use service::JobService;
pub use supervisor::Supervisor;
pub use trigger::AssignmentTrigger;
