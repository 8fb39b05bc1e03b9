//! Task lifecycle messages: create, accepted, status.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use vmflow_core::{OperationId, TaskId};

use crate::command::{CommandEnvelope, TaskCommand};

/// Ask a worker to run a command as a task under an operation.
///
/// `parent_task_id` is the initiating task of the saga that started this task;
/// it is `None` for the top-level task of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNewOperationTaskCommand {
    pub operation_id: OperationId,
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    pub command: CommandEnvelope,
}

impl CreateNewOperationTaskCommand {
    pub fn command_type(&self) -> &str {
        &self.command.command_type
    }
}

/// Sent once per newly created operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOperationCommand {
    pub task_message: CreateNewOperationTaskCommand,
}

/// A worker picked up a task. Carries the command so the receiver can start
/// the matching workflow without another lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTaskAcceptedEvent {
    pub agent_name: String,
    pub operation_id: OperationId,
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    pub command: CommandEnvelope,
}

impl OperationTaskAcceptedEvent {
    pub fn accepted_by(agent_name: impl Into<String>, task: &CreateNewOperationTaskCommand) -> Self {
        Self {
            agent_name: agent_name.into(),
            operation_id: task.operation_id,
            task_id: task.task_id,
            parent_task_id: task.parent_task_id,
            command: task.command.clone(),
        }
    }
}

/// Completion/failure of a task.
///
/// The universal signal consumed by sagas: `parent_task_id` routes it to the
/// saga that dispatched the task, `task_id` to a saga the task itself started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTaskStatusEvent {
    pub operation_id: OperationId,
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    pub command_type: String,
    pub operation_failed: bool,
    #[serde(default)]
    pub payload: Option<JsonValue>,
}

impl OperationTaskStatusEvent {
    pub fn completed(task: &CreateNewOperationTaskCommand, payload: Option<JsonValue>) -> Self {
        Self::for_task(task, false, payload)
    }

    pub fn failed(task: &CreateNewOperationTaskCommand, error: ErrorData) -> Self {
        Self::for_task(task, true, Some(error.into_json()))
    }

    fn for_task(task: &CreateNewOperationTaskCommand, failed: bool, payload: Option<JsonValue>) -> Self {
        Self {
            operation_id: task.operation_id,
            task_id: task.task_id,
            parent_task_id: task.parent_task_id,
            command_type: task.command.command_type.clone(),
            operation_failed: failed,
            payload,
        }
    }

    pub fn is_for<C: TaskCommand>(&self) -> bool {
        self.command_type == C::COMMAND_TYPE
    }

    /// Decode the success payload. A missing payload decodes as JSON `null`
    /// (so `()` and `Option<T>` work for commands without a result).
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(value) => T::deserialize(value),
            None => T::deserialize(&JsonValue::Null),
        }
    }

    /// Failure details, if the payload is an [`ErrorData`].
    pub fn error(&self) -> Option<ErrorData> {
        self.payload.as_ref().and_then(ErrorData::from_json)
    }
}

/// Failure payload carried by failed status events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_json(self) -> JsonValue {
        serde_json::json!({
            "message": self.message,
            "details": self.details,
        })
    }

    pub fn from_json(value: &JsonValue) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

impl core::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> CreateNewOperationTaskCommand {
        CreateNewOperationTaskCommand {
            operation_id: OperationId::new(),
            task_id: TaskId::new(),
            parent_task_id: Some(TaskId::new()),
            command: CommandEnvelope {
                command_type: "remove_vm".to_string(),
                command_json: serde_json::json!({}),
            },
        }
    }

    #[test]
    fn status_inherits_task_routing() {
        let task = task();
        let status = OperationTaskStatusEvent::completed(&task, None);
        assert_eq!(status.operation_id, task.operation_id);
        assert_eq!(status.parent_task_id, task.parent_task_id);
        assert_eq!(status.command_type, "remove_vm");
        assert!(!status.operation_failed);
    }

    #[test]
    fn missing_payload_decodes_as_unit() {
        let status = OperationTaskStatusEvent::completed(&task(), None);
        status.payload_as::<()>().unwrap();
        assert_eq!(status.payload_as::<Option<String>>().unwrap(), None);
    }

    #[test]
    fn failed_status_exposes_error_data() {
        let error = ErrorData::new("disk full").with_details(serde_json::json!({"free": 0}));
        let status = OperationTaskStatusEvent::failed(&task(), error.clone());
        assert!(status.operation_failed);
        assert_eq!(status.error(), Some(error));
    }
}
