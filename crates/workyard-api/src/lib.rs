//! API server for Workyard.
//!
//! Provides HTTP REST API and WebSocket endpoints over the scheduler.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
