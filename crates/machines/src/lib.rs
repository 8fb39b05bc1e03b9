//! Virtual machine domain module.
//!
//! Business rules for machine configuration and host placement, implemented
//! as deterministic domain logic (no IO, no messaging, no storage).

pub mod config;
pub mod placement;

pub use config::{
    ConfigValidationError, DriveConfig, MachineConfig, NetworkAdapterConfig, ValidationIssue,
};
pub use placement::{AgentCapacity, select_agent};
