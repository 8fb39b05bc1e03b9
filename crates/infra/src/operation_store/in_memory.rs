use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use vmflow_core::{Operation, OperationId, OperationResource, OperationTask, Resource, TaskId};

use super::r#trait::{OperationStore, OperationStoreError};

/// In-memory operation store.
///
/// Intended for tests/dev. Every call holds the write lock for its whole
/// duration, which makes each call one transaction.
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<OperationId, Operation>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.read().map(|ops| ops.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<R>(
        &self,
        id: OperationId,
        change: impl FnOnce(&mut Operation) -> Result<R, OperationStoreError>,
    ) -> Result<R, OperationStoreError> {
        let mut operations = self
            .operations
            .write()
            .map_err(|_| OperationStoreError::Storage("lock poisoned".to_string()))?;
        let operation = operations
            .get_mut(&id)
            .ok_or(OperationStoreError::NotFound(id))?;

        // Apply to a copy so a failed change leaves the row untouched.
        let mut updated = operation.clone();
        let result = change(&mut updated)?;
        *operation = updated;
        Ok(result)
    }
}

impl OperationStore for InMemoryOperationStore {
    fn insert(&self, new: Vec<Operation>) -> Result<(), OperationStoreError> {
        let mut operations = self
            .operations
            .write()
            .map_err(|_| OperationStoreError::Storage("lock poisoned".to_string()))?;

        for (idx, operation) in new.iter().enumerate() {
            let id = operation.id();
            if operations.contains_key(&id) || new[..idx].iter().any(|o| o.id() == id) {
                return Err(OperationStoreError::Duplicate(id));
            }
        }

        for operation in new {
            operations.insert(operation.id(), operation);
        }
        Ok(())
    }

    fn get(&self, id: OperationId) -> Result<Option<Operation>, OperationStoreError> {
        let operations = self
            .operations
            .read()
            .map_err(|_| OperationStoreError::Storage("lock poisoned".to_string()))?;
        Ok(operations.get(&id).cloned())
    }

    fn attach_resources(
        &self,
        id: OperationId,
        resources: &[Resource],
    ) -> Result<Vec<OperationResource>, OperationStoreError> {
        self.modify(id, |op| Ok(op.attach_resources(resources)))
    }

    fn add_task(&self, id: OperationId, task: OperationTask) -> Result<bool, OperationStoreError> {
        self.modify(id, |op| Ok(op.add_task(task)))
    }

    fn accept_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        agent_name: &str,
    ) -> Result<bool, OperationStoreError> {
        self.modify(id, |op| Ok(op.accept_task(task_id, agent_name)?))
    }

    fn finish_task(
        &self,
        id: OperationId,
        task_id: TaskId,
        failed: bool,
    ) -> Result<bool, OperationStoreError> {
        self.modify(id, |op| Ok(op.finish_task(task_id, failed)?))
    }

    fn start(&self, id: OperationId) -> Result<bool, OperationStoreError> {
        self.modify(id, |op| Ok(op.start()))
    }

    fn finish(
        &self,
        id: OperationId,
        failed: bool,
        result: Option<JsonValue>,
    ) -> Result<bool, OperationStoreError> {
        self.modify(id, |op| Ok(op.finish(failed, result)))
    }

    fn log(
        &self,
        id: OperationId,
        task_id: Option<TaskId>,
        message: &str,
    ) -> Result<(), OperationStoreError> {
        self.modify(id, |op| {
            op.log(task_id, message);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmflow_core::{MachineId, OperationStatus};

    fn operation() -> Operation {
        Operation::new(
            OperationId::new(),
            OperationTask::new(TaskId::new(), None, "create_machine"),
            &[],
        )
    }

    #[test]
    fn insert_is_all_or_nothing() {
        let store = InMemoryOperationStore::new();
        let existing = operation();
        store.insert(vec![existing.clone()]).unwrap();

        let fresh = operation();
        let err = store.insert(vec![fresh.clone(), existing.clone()]).unwrap_err();

        assert!(matches!(err, OperationStoreError::Duplicate(id) if id == existing.id()));
        assert!(store.get(fresh.id()).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn attaching_twice_keeps_one_row() {
        let store = InMemoryOperationStore::new();
        let op = operation();
        store.insert(vec![op.clone()]).unwrap();
        let machine = Resource::machine(MachineId::new());

        assert_eq!(store.attach_resources(op.id(), &[machine]).unwrap().len(), 1);
        assert!(store.attach_resources(op.id(), &[machine]).unwrap().is_empty());
        assert_eq!(store.get(op.id()).unwrap().unwrap().resources().len(), 1);
    }

    #[test]
    fn failed_change_leaves_row_untouched() {
        let store = InMemoryOperationStore::new();
        let op = operation();
        store.insert(vec![op.clone()]).unwrap();

        let err = store.accept_task(op.id(), TaskId::new(), "hv-01").unwrap_err();
        assert!(matches!(err, OperationStoreError::Domain(_)));
        assert_eq!(store.get(op.id()).unwrap().unwrap(), op);
    }

    #[test]
    fn missing_operation_is_not_found() {
        let store = InMemoryOperationStore::new();
        let id = OperationId::new();
        assert!(matches!(store.start(id), Err(OperationStoreError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn finish_is_terminal() {
        let store = InMemoryOperationStore::new();
        let op = operation();
        store.insert(vec![op.clone()]).unwrap();

        assert!(store.finish(op.id(), true, None).unwrap());
        assert!(!store.finish(op.id(), false, None).unwrap());
        assert_eq!(store.get(op.id()).unwrap().unwrap().status(), OperationStatus::Failed);
    }
}
