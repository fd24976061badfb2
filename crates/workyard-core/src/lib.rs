//! Core domain types for the Workyard job scheduler.
//!
//! This crate contains:
//! - Resource identifiers
//! - Job and worker entities with their status enums
//! - The shared error type

pub mod error;
pub mod id;
pub mod job;
pub mod worker;

pub use error::{Error, Result};
pub use id::ResourceId;
pub use job::{Job, JobPriority, JobStatus};
pub use worker::{Worker, WorkerStatus};
