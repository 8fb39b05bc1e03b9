use std::collections::HashMap;
use std::sync::RwLock;

use vmflow_core::{ExpectedRevision, OperationId, TaskId};

use super::r#trait::{SagaRecord, SagaStore, SagaStoreError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct SagaKey {
    operation_id: OperationId,
    initiating_task_id: TaskId,
}

/// In-memory saga store. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    records: RwLock<HashMap<SagaKey, SagaRecord>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record stored for an operation (nested sagas included).
    pub fn for_operation(&self, operation_id: OperationId) -> Vec<SagaRecord> {
        let Ok(records) = self.records.read() else {
            return Vec::new();
        };
        let mut found: Vec<SagaRecord> = records
            .values()
            .filter(|r| r.operation_id() == operation_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.initiating_task_id());
        found
    }
}

impl SagaStore for InMemorySagaStore {
    fn load(
        &self,
        operation_id: OperationId,
        initiating_task_id: TaskId,
    ) -> Result<Option<SagaRecord>, SagaStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| SagaStoreError::Storage("lock poisoned".to_string()))?;

        Ok(records
            .get(&SagaKey {
                operation_id,
                initiating_task_id,
            })
            .cloned())
    }

    fn save(&self, mut record: SagaRecord, expected: ExpectedRevision) -> Result<SagaRecord, SagaStoreError> {
        let key = SagaKey {
            operation_id: record.operation_id(),
            initiating_task_id: record.initiating_task_id(),
        };

        let mut records = self
            .records
            .write()
            .map_err(|_| SagaStoreError::Storage("lock poisoned".to_string()))?;

        let actual = records.get(&key).map(|r| r.revision);
        if !expected.matches(actual) {
            return Err(SagaStoreError::Concurrency {
                operation_id: key.operation_id,
                expected,
                actual,
            });
        }

        record.revision = actual.unwrap_or(0) + 1;
        records.insert(key, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmflow_messages::SagaHeader;

    fn record() -> SagaRecord {
        SagaRecord::new(
            SagaHeader {
                saga_type: "saga.test".to_string(),
                operation_id: OperationId::new(),
                initiating_task_id: TaskId::new(),
                parent_task_id: None,
            },
            serde_json::json!({"step": 1}),
        )
    }

    #[test]
    fn revision_increments_on_every_save() {
        let store = InMemorySagaStore::new();
        let saved = store.save(record(), ExpectedRevision::New).unwrap();
        assert_eq!(saved.revision, 1);

        let saved = store.save(saved.clone(), ExpectedRevision::Exact(1)).unwrap();
        assert_eq!(saved.revision, 2);

        let loaded = store
            .load(saved.operation_id(), saved.initiating_task_id())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn stale_revision_is_a_conflict() {
        let store = InMemorySagaStore::new();
        let first = store.save(record(), ExpectedRevision::New).unwrap();
        store.save(first.clone(), ExpectedRevision::Exact(1)).unwrap();

        let err = store.save(first.clone(), ExpectedRevision::Exact(1)).unwrap_err();
        assert!(matches!(err, SagaStoreError::Concurrency { actual: Some(2), .. }));

        let err = store.save(first, ExpectedRevision::New).unwrap_err();
        assert!(matches!(err, SagaStoreError::Concurrency { .. }));
    }

    #[test]
    fn sagas_of_one_operation_are_kept_apart() {
        let store = InMemorySagaStore::new();
        let a = record();
        let mut b = record();
        b.header.operation_id = a.operation_id();

        store.save(a.clone(), ExpectedRevision::New).unwrap();
        store.save(b.clone(), ExpectedRevision::New).unwrap();

        assert_eq!(store.for_operation(a.operation_id()).len(), 2);
    }
}
