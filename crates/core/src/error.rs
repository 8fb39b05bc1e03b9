//! Domain error model.

use thiserror::Error;

use crate::id::{OperationId, TaskId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only (bad ids, missing tasks, revision conflicts).
/// Storage and transport concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced task does not exist on the operation.
    #[error("task {task_id} not found on operation {operation_id}")]
    TaskNotFound {
        operation_id: OperationId,
        task_id: TaskId,
    },

    /// A conflict occurred (e.g. stale revision / duplicate id).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
