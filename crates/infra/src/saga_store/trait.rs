use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use vmflow_core::{ExpectedRevision, OperationId, SagaId, TaskId};
use vmflow_messages::{SagaAction, SagaHeader, SagaStatus};

/// Persisted saga instance.
///
/// Keyed by (operation id, initiating task id). `data` is the workflow's own
/// data record as JSON; only its saga reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    /// Incremented by the store on every save; 0 for a record never saved.
    pub revision: u64,
    pub header: SagaHeader,
    pub status: SagaStatus,
    pub data: JsonValue,
    /// Actions saved with the last transition that have not run yet.
    #[serde(default)]
    pub outbox: Vec<SagaAction>,
}

impl SagaRecord {
    pub fn new(header: SagaHeader, data: JsonValue) -> Self {
        Self {
            id: SagaId::new(),
            revision: 0,
            header,
            status: SagaStatus::Initiated,
            data,
            outbox: Vec::new(),
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.header.operation_id
    }

    pub fn initiating_task_id(&self) -> TaskId {
        self.header.initiating_task_id
    }
}

#[derive(Debug, Error)]
pub enum SagaStoreError {
    #[error("saga revision conflict for operation {operation_id} (expected {expected:?}, found {actual:?})")]
    Concurrency {
        operation_id: OperationId,
        expected: ExpectedRevision,
        actual: Option<u64>,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed saga data store with compare-and-swap on revision.
pub trait SagaStore: Send + Sync {
    fn load(
        &self,
        operation_id: OperationId,
        initiating_task_id: TaskId,
    ) -> Result<Option<SagaRecord>, SagaStoreError>;

    /// Save `record` if the stored revision matches `expected`.
    ///
    /// Returns the record as stored, with its new revision.
    fn save(&self, record: SagaRecord, expected: ExpectedRevision) -> Result<SagaRecord, SagaStoreError>;
}

impl<S> SagaStore for Arc<S>
where
    S: SagaStore + ?Sized,
{
    fn load(
        &self,
        operation_id: OperationId,
        initiating_task_id: TaskId,
    ) -> Result<Option<SagaRecord>, SagaStoreError> {
        (**self).load(operation_id, initiating_task_id)
    }

    fn save(&self, record: SagaRecord, expected: ExpectedRevision) -> Result<SagaRecord, SagaStoreError> {
        (**self).save(record, expected)
    }
}
