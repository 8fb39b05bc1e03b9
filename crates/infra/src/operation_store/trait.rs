use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use vmflow_core::{DomainError, Operation, OperationId, OperationResource, OperationTask, Resource, TaskId};

/// Operation store error.
///
/// Infrastructure errors (missing rows, duplicates, storage) plus domain
/// errors raised by the operation entity while applying a change.
#[derive(Debug, Error)]
pub enum OperationStoreError {
    #[error("operation {0} not found")]
    NotFound(OperationId),

    #[error("operation {0} already exists")]
    Duplicate(OperationId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Transactional store of Operation records (with their tasks, resources and
/// log entries).
///
/// Each method is one transaction. Mutations that would not change anything
/// (resource already attached, task already finished, operation already
/// terminal) succeed and report `false`/empty so callers can log duplicates.
pub trait OperationStore: Send + Sync {
    /// Insert new operations, all or none.
    ///
    /// Fails with `Duplicate` if any id already exists.
    fn insert(&self, operations: Vec<Operation>) -> Result<(), OperationStoreError>;

    fn get(&self, id: OperationId) -> Result<Option<Operation>, OperationStoreError>;

    /// Attach resources, skipping ones already attached. Returns new rows only.
    fn attach_resources(
        &self,
        id: OperationId,
        resources: &[Resource],
    ) -> Result<Vec<OperationResource>, OperationStoreError>;

    fn add_task(&self, id: OperationId, task: OperationTask) -> Result<bool, OperationStoreError>;

    fn accept_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        agent_name: &str,
    ) -> Result<bool, OperationStoreError>;

    fn finish_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        failed: bool,
    ) -> Result<bool, OperationStoreError>;

    /// Queued → Running.
    fn start(&self, id: OperationId) -> Result<bool, OperationStoreError>;

    /// Move to `Completed`/`Failed` with the result payload.
    fn finish(
        &self,
        id: OperationId,
        failed: bool,
        result: Option<JsonValue>,
    ) -> Result<bool, OperationStoreError>;

    fn log(
        &self,
        id: OperationId,
        task_id: Option<TaskId>,
        message: &str,
    ) -> Result<(), OperationStoreError>;
}

impl<S> OperationStore for Arc<S>
where
    S: OperationStore + ?Sized,
{
    fn insert(&self, operations: Vec<Operation>) -> Result<(), OperationStoreError> {
        (**self).insert(operations)
    }

    fn get(&self, id: OperationId) -> Result<Option<Operation>, OperationStoreError> {
        (**self).get(id)
    }

    fn attach_resources(
        &self,
        id: OperationId,
        resources: &[Resource],
    ) -> Result<Vec<OperationResource>, OperationStoreError> {
        (**self).attach_resources(id, resources)
    }

    fn add_task(&self, id: OperationId, task: OperationTask) -> Result<bool, OperationStoreError> {
        (**self).add_task(id, task)
    }

    fn accept_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        agent_name: &str,
    ) -> Result<bool, OperationStoreError> {
        (**self).accept_task(id, task_id, agent_name)
    }

    fn finish_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        failed: bool,
    ) -> Result<bool, OperationStoreError> {
        (**self).finish_task(id, task_id, failed)
    }

    fn start(&self, id: OperationId) -> Result<bool, OperationStoreError> {
        (**self).start(id)
    }

    fn finish(
        &self,
        id: OperationId,
        failed: bool,
        result: Option<JsonValue>,
    ) -> Result<bool, OperationStoreError> {
        (**self).finish(id, failed, result)
    }

    fn log(
        &self,
        id: OperationId,
        task_id: Option<TaskId>,
        message: &str,
    ) -> Result<(), OperationStoreError> {
        (**self).log(id, task_id, message)
    }
}
