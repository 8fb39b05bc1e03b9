//! Operation entity: the top-level unit of orchestrated work.
//!
//! An operation is created `Queued` by the operation dispatcher and moved
//! through its lifecycle by accepted/status events:
//!
//! ```text
//! Queued ──accepted──▶ Running ──status──▶ Completed | Failed
//!    └────────────────status────────────────▶ Completed | Failed
//! ```
//!
//! Resources, tasks and log entries are append-only. Terminal operations are
//! never changed again, which makes redelivered status events harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::id::{OperationId, ResourceId, TaskId};
use crate::resource::{Resource, ResourceType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

/// Association row: at most one per (operation, resource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResource {
    pub id: Uuid,
    pub operation_id: OperationId,
    pub resource_id: ResourceId,
    pub resource_type: ResourceType,
}

impl OperationResource {
    pub fn resource(&self) -> Resource {
        Resource::new(self.resource_id, self.resource_type)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// A task dispatched under an operation.
///
/// The top-level task has no parent; sub-tasks started by a saga point at the
/// task that initiated that saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTask {
    pub id: TaskId,
    pub parent_task_id: Option<TaskId>,
    pub command_type: String,
    pub state: TaskState,
    pub agent_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OperationTask {
    pub fn new(id: TaskId, parent_task_id: Option<TaskId>, command_type: impl Into<String>) -> Self {
        Self {
            id,
            parent_task_id,
            command_type: command_type.into(),
            state: TaskState::Queued,
            agent_name: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    id: OperationId,
    status: OperationStatus,
    resources: Vec<OperationResource>,
    tasks: Vec<OperationTask>,
    log_entries: Vec<LogEntry>,
    result: Option<JsonValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Operation {
    /// Create a queued operation with its initiating (top-level) task.
    pub fn new(id: OperationId, initial_task: OperationTask, resources: &[Resource]) -> Self {
        let now = Utc::now();
        let mut operation = Self {
            id,
            status: OperationStatus::Queued,
            resources: Vec::new(),
            tasks: vec![initial_task],
            log_entries: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        };
        operation.attach_resources(resources);
        operation
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn resources(&self) -> &[OperationResource] {
        &self.resources
    }

    pub fn tasks(&self) -> &[OperationTask] {
        &self.tasks
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    pub fn result(&self) -> Option<&JsonValue> {
        self.result.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The task whose completion completes the operation.
    pub fn root_task(&self) -> Option<&OperationTask> {
        self.tasks.iter().find(|t| t.parent_task_id.is_none())
    }

    pub fn task(&self, task_id: TaskId) -> Option<&OperationTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Attach a resource unless one with the same id is already attached.
    pub fn attach_resource(&mut self, resource: &Resource) -> Option<OperationResource> {
        if self.resources.iter().any(|r| r.resource_id == resource.id) {
            return None;
        }

        let row = OperationResource {
            id: Uuid::now_v7(),
            operation_id: self.id,
            resource_id: resource.id,
            resource_type: resource.resource_type,
        };
        self.resources.push(row.clone());
        self.touch();
        Some(row)
    }

    /// Attach many resources; returns only the rows that were newly added.
    pub fn attach_resources(&mut self, resources: &[Resource]) -> Vec<OperationResource> {
        resources
            .iter()
            .filter_map(|r| self.attach_resource(r))
            .collect()
    }

    /// Append a task; a task id that is already present is ignored.
    pub fn add_task(&mut self, task: OperationTask) -> bool {
        if self.task(task.id).is_some() {
            return false;
        }
        self.tasks.push(task);
        self.touch();
        true
    }

    /// Mark a task as picked up by an agent (Queued → Running).
    pub fn accept_task(&mut self, task_id: TaskId, agent_name: &str) -> DomainResult<bool> {
        let operation_id = self.id;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(DomainError::TaskNotFound {
                operation_id,
                task_id,
            })?;

        if task.state != TaskState::Queued {
            return Ok(false);
        }
        task.state = TaskState::Running;
        task.agent_name = Some(agent_name.to_string());
        self.touch();
        Ok(true)
    }

    /// Record a task's final outcome. Already-finished tasks are left untouched.
    pub fn finish_task(&mut self, task_id: TaskId, failed: bool) -> DomainResult<bool> {
        let operation_id = self.id;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(DomainError::TaskNotFound {
                operation_id,
                task_id,
            })?;

        if task.state.is_terminal() {
            return Ok(false);
        }
        task.state = if failed {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        self.touch();
        Ok(true)
    }

    /// Queued → Running. Returns whether the status changed.
    pub fn start(&mut self) -> bool {
        if self.status != OperationStatus::Queued {
            return false;
        }
        self.status = OperationStatus::Running;
        self.touch();
        true
    }

    /// Move to `Completed`/`Failed`. Terminal operations are left untouched.
    pub fn finish(&mut self, failed: bool, result: Option<JsonValue>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = if failed {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        };
        self.result = result;
        self.touch();
        true
    }

    pub fn log(&mut self, task_id: Option<TaskId>, message: impl Into<String>) {
        self.log_entries.push(LogEntry {
            timestamp: Utc::now(),
            task_id,
            message: message.into(),
        });
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
