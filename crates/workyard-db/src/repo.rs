//! Repository traits and implementations.

pub mod job;
pub mod worker;

pub use job::{JobRepo, PgJobRepo};
pub use worker::{PgWorkerRepo, WorkerRepo};
