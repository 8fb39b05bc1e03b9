use tracing::debug;

use vmflow_core::{OperationId, OperationResource, OperationTask, Resource, TaskId};
use vmflow_messages::{
    Address, CommandEnvelope, CreateNewOperationTaskCommand, Message, MessageBus, MessageEnvelope,
    TaskCommand,
};

use super::DispatchError;
use crate::operation_store::OperationStore;

/// Starts correlated sub-tasks under an existing operation.
///
/// Never creates an operation: a missing operation is `OperationNotFound`.
#[derive(Debug)]
pub struct OperationTaskDispatcher<S, B> {
    store: S,
    bus: B,
    controller: Address,
}

impl<S, B> OperationTaskDispatcher<S, B> {
    pub fn new(store: S, bus: B, controller: Address) -> Self {
        Self {
            store,
            bus,
            controller,
        }
    }
}

impl<S, B> OperationTaskDispatcher<S, B>
where
    S: OperationStore,
    B: MessageBus<MessageEnvelope>,
{
    /// Start `command` as a new task of `operation_id`; returns the task id.
    pub fn start_new<C: TaskCommand>(
        &self,
        operation_id: OperationId,
        parent_task_id: Option<TaskId>,
        command: &C,
        resources: &[Resource],
    ) -> Result<TaskId, DispatchError> {
        let task_id = TaskId::new();
        self.start_task(
            operation_id,
            task_id,
            parent_task_id,
            CommandEnvelope::wrap(command)?,
            resources,
        )?;
        Ok(task_id)
    }

    /// Start an already-serialized command under a caller-chosen task id.
    ///
    /// Starting the same task id twice records one task row.
    pub fn start_task(
        &self,
        operation_id: OperationId,
        task_id: TaskId,
        parent_task_id: Option<TaskId>,
        command: CommandEnvelope,
        resources: &[Resource],
    ) -> Result<(), DispatchError> {
        if self.store.get(operation_id)?.is_none() {
            return Err(DispatchError::OperationNotFound(operation_id));
        }

        self.attach_resources(operation_id, resources)?;
        let added = self.store.add_task(
            operation_id,
            OperationTask::new(task_id, parent_task_id, command.command_type.clone()),
        )?;
        if !added {
            debug!(%operation_id, %task_id, "task row already recorded");
        }

        let command_type = command.command_type.clone();
        self.bus
            .send(
                &self.controller,
                MessageEnvelope::new(Message::CreateTask(CreateNewOperationTaskCommand {
                    operation_id,
                    task_id,
                    parent_task_id,
                    command,
                })),
            )
            .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;

        debug!(%operation_id, %task_id, command_type = %command_type, "task dispatched");
        Ok(())
    }

    /// Link resources to an operation, skipping ones already linked.
    pub fn attach_resources(
        &self,
        operation_id: OperationId,
        resources: &[Resource],
    ) -> Result<Vec<OperationResource>, DispatchError> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }
        let attached = self.store.attach_resources(operation_id, resources)?;
        if attached.len() < resources.len() {
            debug!(
                %operation_id,
                requested = resources.len(),
                attached = attached.len(),
                "skipped resources already attached"
            );
        }
        Ok(attached)
    }
}
