//! KDL configuration parsing for Workyard.
//!
//! This crate handles parsing of the system configuration file
//! (`workyard.kdl`) and its environment overrides.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, GateScope, SchedulerConfig, ServerConfig, SystemConfig, load_system_config,
    parse_system_config,
};
