//! Workflow registry: command type / saga type → type-erased saga handler.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use vmflow_messages::{
    CommandEnvelope, Message, OperationTaskStatusEvent, SagaAction, SagaHeader, TaskCommand,
    Workflow, WorkflowError, WorkflowResult,
};

/// Result of running one hook: the new data record and the actions to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub data: JsonValue,
    pub actions: Vec<SagaAction>,
}

/// A workflow with its data and command types erased to JSON.
pub trait SagaHandler: Send + Sync {
    fn saga_type(&self) -> &'static str;

    fn command_type(&self) -> &'static str;

    fn initiated(&self, saga: &SagaHeader, command: &CommandEnvelope) -> WorkflowResult<Step>;

    fn task_status(
        &self,
        saga: &SagaHeader,
        data: &JsonValue,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Step>;

    fn own_status(
        &self,
        saga: &SagaHeader,
        data: &JsonValue,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Step>;

    fn message(&self, saga: &SagaHeader, data: &JsonValue, message: &Message) -> WorkflowResult<Step>;
}

struct TypedSaga<W>(W);

impl<W: Workflow> TypedSaga<W> {
    fn run<F>(&self, data: W::Data, hook: F) -> WorkflowResult<Step>
    where
        F: FnOnce(&W, &mut W::Data) -> WorkflowResult<Vec<SagaAction>>,
    {
        let mut data = data;
        let actions = hook(&self.0, &mut data)?;
        Ok(Step {
            data: serde_json::to_value(&data).map_err(WorkflowError::Data)?,
            actions,
        })
    }

    fn load(data: &JsonValue) -> WorkflowResult<W::Data> {
        W::Data::deserialize(data).map_err(WorkflowError::Data)
    }
}

impl<W: Workflow> SagaHandler for TypedSaga<W> {
    fn saga_type(&self) -> &'static str {
        W::saga_type()
    }

    fn command_type(&self) -> &'static str {
        W::Command::COMMAND_TYPE
    }

    fn initiated(&self, saga: &SagaHeader, command: &CommandEnvelope) -> WorkflowResult<Step> {
        let command = command.decode::<W::Command>()?;
        self.run(W::Data::default(), |w, data| w.initiated(saga, data, command))
    }

    fn task_status(
        &self,
        saga: &SagaHeader,
        data: &JsonValue,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Step> {
        self.run(Self::load(data)?, |w, data| w.task_status(saga, data, event))
    }

    fn own_status(
        &self,
        saga: &SagaHeader,
        data: &JsonValue,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Step> {
        self.run(Self::load(data)?, |w, data| w.own_status(saga, data, event))
    }

    fn message(&self, saga: &SagaHeader, data: &JsonValue, message: &Message) -> WorkflowResult<Step> {
        self.run(Self::load(data)?, |w, data| w.message(saga, data, message))
    }
}

/// Registered workflows, looked up by initiating command type (to start a
/// saga) or by saga type (to resume a stored one).
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    by_command: HashMap<&'static str, Arc<dyn SagaHandler>>,
    by_saga: HashMap<&'static str, Arc<dyn SagaHandler>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: Workflow>(&mut self, workflow: W) -> &mut Self {
        let handler: Arc<dyn SagaHandler> = Arc::new(TypedSaga(workflow));
        self.by_command.insert(handler.command_type(), handler.clone());
        self.by_saga.insert(handler.saga_type(), handler);
        self
    }

    pub fn for_command(&self, command_type: &str) -> Option<Arc<dyn SagaHandler>> {
        self.by_command.get(command_type).cloned()
    }

    pub fn for_saga(&self, saga_type: &str) -> Option<Arc<dyn SagaHandler>> {
        self.by_saga.get(saga_type).cloned()
    }
}

impl core::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut sagas: Vec<_> = self.by_saga.keys().collect();
        sagas.sort();
        f.debug_struct("WorkflowRegistry").field("sagas", &sagas).finish()
    }
}
