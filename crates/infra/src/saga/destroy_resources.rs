//! Destroy a set of resources under one operation.
//!
//! ```text
//! Initiated ──all destroy sub-tasks done──▶ ResourcesDestroyed ──release──▶ ResourcesReleased
//! ```
//!
//! One `DestroyMachineCommand` is dispatched per machine, all at once. The
//! sub-task ids are remembered so each one is counted exactly once.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vmflow_core::{Resource, ResourceType, TaskId};
use vmflow_messages::contracts::{
    DestroyMachineCommand, DestroyResourcesCommand, DestroyResourcesResponse,
    ReleaseResourcesCommand,
};
use vmflow_messages::{
    ErrorData, OperationTaskStatusEvent, SagaAction, SagaHeader, Workflow, WorkflowResult,
    fail_or_run,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyResourcesState {
    #[default]
    Initiated,
    ResourcesDestroyed,
    ResourcesReleased,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DestroyResourcesSagaData {
    pub state: DestroyResourcesState,
    pub resources: Vec<Resource>,
    /// Destroy sub-tasks still outstanding.
    pub pending: Vec<TaskId>,
    pub outcome: DestroyResourcesResponse,
}

#[derive(Debug, Default)]
pub struct DestroyResourcesSaga;

impl DestroyResourcesSaga {
    fn release(data: &mut DestroyResourcesSagaData) -> WorkflowResult<Vec<SagaAction>> {
        data.state = DestroyResourcesState::ResourcesDestroyed;
        Ok(vec![SagaAction::start_task(&ReleaseResourcesCommand {
            resources: data.outcome.destroyed_resources.clone(),
        })?])
    }
}

impl Workflow for DestroyResourcesSaga {
    type Command = DestroyResourcesCommand;
    type Data = DestroyResourcesSagaData;

    fn saga_type() -> &'static str {
        "saga.destroy_resources"
    }

    fn initiated(
        &self,
        saga: &SagaHeader,
        data: &mut DestroyResourcesSagaData,
        command: DestroyResourcesCommand,
    ) -> WorkflowResult<Vec<SagaAction>> {
        data.resources = command.resources;

        let unsupported: Vec<&Resource> = data
            .resources
            .iter()
            .filter(|r| r.resource_type != ResourceType::Machine)
            .collect();
        if !unsupported.is_empty() {
            return Ok(vec![SagaAction::fail(
                ErrorData::new(format!(
                    "cannot destroy resources of type {}",
                    unsupported[0].resource_type
                ))
                .with_details(serde_json::json!({ "unsupported": unsupported })),
            )]);
        }

        if data.resources.is_empty() {
            data.state = DestroyResourcesState::ResourcesReleased;
            return Ok(vec![SagaAction::complete_with(&data.outcome)?]);
        }

        let mut actions = Vec::with_capacity(data.resources.len());
        for resource in &data.resources {
            let Some(machine_id) = resource.machine_id() else {
                continue;
            };
            let task_id = TaskId::new();
            data.pending.push(task_id);
            actions.push(SagaAction::start_task_with_id(
                task_id,
                &DestroyMachineCommand { machine_id },
                vec![*resource],
            )?);
        }

        info!(
            operation_id = %saga.operation_id,
            machines = actions.len(),
            "destroying machines"
        );
        Ok(actions)
    }

    fn task_status(
        &self,
        saga: &SagaHeader,
        data: &mut DestroyResourcesSagaData,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        match data.state {
            DestroyResourcesState::Initiated if event.is_for::<DestroyMachineCommand>() => {
                let Some(index) = data.pending.iter().position(|t| *t == event.task_id) else {
                    debug!(
                        operation_id = %saga.operation_id,
                        task_id = %event.task_id,
                        "destroy status already counted; ignoring"
                    );
                    return Ok(Vec::new());
                };

                fail_or_run(event, |destroyed: DestroyResourcesResponse| {
                    data.pending.remove(index);
                    data.outcome.merge(destroyed);
                    if data.pending.is_empty() {
                        Self::release(data)
                    } else {
                        Ok(Vec::new())
                    }
                })
            }
            DestroyResourcesState::ResourcesDestroyed if event.is_for::<ReleaseResourcesCommand>() => {
                fail_or_run(event, |_: serde::de::IgnoredAny| {
                    data.state = DestroyResourcesState::ResourcesReleased;
                    Ok(vec![SagaAction::complete_with(&data.outcome)?])
                })
            }
            state => {
                debug!(
                    ?state,
                    command_type = %event.command_type,
                    "status not expected in this state; ignoring"
                );
                Ok(Vec::new())
            }
        }
    }
}
