//! Workflow saga mechanics (framework only, no business rules).
//!
//! - A saga is (typed data, status) plus transition hooks that mutate the data
//!   and return the actions to perform
//! - One saga instance per (operation, initiating task); nested sagas under the
//!   same operation never share state
//! - Hooks never touch the bus or the stores; infra persists the new data and
//!   the returned actions with a revision check and only then executes them
//! - Once a saga is `Completed`/`Failed` it ignores every further message
//!
//! Workflows are dispatched by command type through a registry kept by infra.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use vmflow_core::{MachineId, OperationId, Resource, TaskId};

use crate::address::Address;
use crate::command::{CommandDecodeError, CommandEnvelope, TaskCommand};
use crate::envelope::Message;
use crate::task::{ErrorData, OperationTaskStatusEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Initiated,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }
}

/// Identity of a saga instance, shared by every workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaHeader {
    pub saga_type: String,
    pub operation_id: OperationId,
    /// Task whose acceptance started this saga; its status is the saga's result.
    pub initiating_task_id: TaskId,
    /// Saga (if any) that dispatched the initiating task.
    pub parent_task_id: Option<TaskId>,
}

/// Side effects a workflow asks for.
///
/// Actions are stored with the saga until they have run, so they must be
/// serializable and safe to run again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaAction {
    /// Start a sub-task under the saga's operation.
    StartTask {
        task_id: TaskId,
        command: CommandEnvelope,
        resources: Vec<Resource>,
    },
    /// Send a message straight to a queue (sub-protocols such as placement verification).
    Send { destination: Address, message: Message },
    /// Record that the operation touches these resources.
    AttachResources(Vec<Resource>),
    /// Remember which agent hosts a machine.
    RecordMachine {
        machine_id: MachineId,
        agent_name: String,
    },
    /// Finish successfully and report to the parent.
    Complete { payload: Option<JsonValue> },
    /// Finish with a failure and report to the parent.
    Fail { payload: Option<JsonValue> },
}

impl SagaAction {
    pub fn start_task<C: TaskCommand>(command: &C) -> WorkflowResult<SagaAction> {
        Self::start_task_with_id(TaskId::new(), command, Vec::new())
    }

    /// Start a sub-task with a pre-allocated id, so the saga can remember it.
    pub fn start_task_with_id<C: TaskCommand>(
        task_id: TaskId,
        command: &C,
        resources: Vec<Resource>,
    ) -> WorkflowResult<SagaAction> {
        Ok(SagaAction::StartTask {
            task_id,
            command: CommandEnvelope::wrap(command)?,
            resources,
        })
    }

    pub fn complete() -> SagaAction {
        SagaAction::Complete { payload: None }
    }

    pub fn complete_with<T: Serialize>(payload: &T) -> WorkflowResult<SagaAction> {
        let payload = serde_json::to_value(payload).map_err(WorkflowError::Data)?;
        Ok(SagaAction::Complete {
            payload: Some(payload),
        })
    }

    pub fn fail(error: ErrorData) -> SagaAction {
        SagaAction::Fail {
            payload: Some(error.into_json()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaAction::Complete { .. } | SagaAction::Fail { .. })
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Command(#[from] CommandDecodeError),

    #[error("unexpected payload for '{command_type}': {source}")]
    Payload {
        command_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("saga data could not be encoded/decoded: {0}")]
    Data(#[source] serde_json::Error),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// A multi-step workflow started by accepting a `Command`.
///
/// Hooks mutate `data` in place and return actions. Returning no actions and
/// leaving `data` unchanged means "nothing happened" and nothing is saved.
pub trait Workflow: Send + Sync + 'static {
    type Command: TaskCommand;
    type Data: Clone
        + core::fmt::Debug
        + Default
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Stable saga type identifier (e.g. "saga.create_machine").
    fn saga_type() -> &'static str;

    /// The initiating command was accepted. The only entry point that starts
    /// business logic.
    fn initiated(
        &self,
        saga: &SagaHeader,
        data: &mut Self::Data,
        command: Self::Command,
    ) -> WorkflowResult<Vec<SagaAction>>;

    /// A sub-task started by this saga finished.
    fn task_status(
        &self,
        _saga: &SagaHeader,
        _data: &mut Self::Data,
        _event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        Ok(Vec::new())
    }

    /// The saga's own initiating task was reported finished from outside.
    fn own_status(
        &self,
        _saga: &SagaHeader,
        _data: &mut Self::Data,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        let payload = event.payload.clone();
        Ok(vec![if event.operation_failed {
            SagaAction::Fail { payload }
        } else {
            SagaAction::Complete { payload }
        }])
    }

    /// A sub-protocol message addressed to this saga.
    fn message(
        &self,
        _saga: &SagaHeader,
        _data: &mut Self::Data,
        _message: &Message,
    ) -> WorkflowResult<Vec<SagaAction>> {
        Ok(Vec::new())
    }
}

/// Fail fast on a failed sub-task, otherwise continue with its decoded payload.
///
/// The failure payload is forwarded untouched so the original error reaches
/// the top-level operation.
pub fn fail_or_run<T, F>(event: &OperationTaskStatusEvent, next: F) -> WorkflowResult<Vec<SagaAction>>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> WorkflowResult<Vec<SagaAction>>,
{
    if event.operation_failed {
        debug!(
            operation_id = %event.operation_id,
            task_id = %event.task_id,
            command_type = %event.command_type,
            "sub-task failed; failing saga"
        );
        return Ok(vec![SagaAction::Fail {
            payload: event.payload.clone(),
        }]);
    }

    let payload = event
        .payload_as::<T>()
        .map_err(|source| WorkflowError::Payload {
            command_type: event.command_type.clone(),
            source,
        })?;
    next(payload)
}
