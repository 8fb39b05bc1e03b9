//! `vmflow-core`: orchestration foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no transport or storage
//! concerns): identifiers, resource references, the operation entity and
//! optimistic revision expectations.

pub mod error;
pub mod id;
pub mod operation;
pub mod resource;
pub mod revision;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, MachineId, OperationId, ResourceId, SagaId, TaskId};
pub use operation::{
    LogEntry, Operation, OperationResource, OperationStatus, OperationTask, TaskState,
};
pub use resource::{Resource, ResourceType};
pub use revision::ExpectedRevision;
