//! Destroy a single machine by removing it from its agent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vmflow_core::{MachineId, Resource, TaskId};
use vmflow_messages::contracts::{
    DestroyMachineCommand, DestroyResourcesResponse, RemoveVmCommand, RemoveVmResult,
};
use vmflow_messages::{
    OperationTaskStatusEvent, SagaAction, SagaHeader, Workflow, WorkflowResult, fail_or_run,
};

use crate::inventory::MachineInventory;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DestroyMachineSagaData {
    pub machine_id: Option<MachineId>,
    pub agent_name: Option<String>,
    pub removed: bool,
}

pub struct DestroyMachineSaga {
    inventory: Arc<dyn MachineInventory>,
}

impl DestroyMachineSaga {
    pub fn new(inventory: Arc<dyn MachineInventory>) -> Self {
        Self { inventory }
    }
}

impl Workflow for DestroyMachineSaga {
    type Command = DestroyMachineCommand;
    type Data = DestroyMachineSagaData;

    fn saga_type() -> &'static str {
        "saga.destroy_machine"
    }

    fn initiated(
        &self,
        saga: &SagaHeader,
        data: &mut DestroyMachineSagaData,
        command: DestroyMachineCommand,
    ) -> WorkflowResult<Vec<SagaAction>> {
        let machine_id = command.machine_id;
        let machine = Resource::machine(machine_id);
        data.machine_id = Some(machine_id);

        let Some(agent_name) = self.inventory.agent_of(machine_id) else {
            // Nothing hosts it any more: already gone.
            info!(operation_id = %saga.operation_id, %machine_id, "machine unknown; treating as destroyed");
            data.removed = true;
            return Ok(vec![SagaAction::complete_with(&DestroyResourcesResponse {
                destroyed_resources: vec![machine],
                detached_resources: Vec::new(),
            })?]);
        };

        data.agent_name = Some(agent_name.clone());
        Ok(vec![SagaAction::start_task_with_id(
            TaskId::new(),
            &RemoveVmCommand {
                agent_name,
                machine_id,
            },
            vec![machine],
        )?])
    }

    fn task_status(
        &self,
        saga: &SagaHeader,
        data: &mut DestroyMachineSagaData,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        if data.removed || !event.is_for::<RemoveVmCommand>() {
            debug!(
                operation_id = %saga.operation_id,
                command_type = %event.command_type,
                "status not expected in this state; ignoring"
            );
            return Ok(Vec::new());
        }

        fail_or_run(event, |removed: Option<RemoveVmResult>| {
            data.removed = true;
            let detached = removed.unwrap_or_default().detached;
            Ok(vec![SagaAction::complete_with(&DestroyResourcesResponse {
                destroyed_resources: data.machine_id.map(Resource::machine).into_iter().collect(),
                detached_resources: detached,
            })?])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmflow_core::{OperationId, ResourceId, ResourceType};
    use vmflow_messages::{ErrorData, TaskCommand};

    use crate::inventory::InMemoryMachineInventory;

    fn header() -> SagaHeader {
        SagaHeader {
            saga_type: DestroyMachineSaga::saga_type().to_string(),
            operation_id: OperationId::new(),
            initiating_task_id: TaskId::new(),
            parent_task_id: Some(TaskId::new()),
        }
    }

    fn removed(payload: serde_json::Value) -> OperationTaskStatusEvent {
        OperationTaskStatusEvent {
            operation_id: OperationId::new(),
            task_id: TaskId::new(),
            parent_task_id: None,
            command_type: RemoveVmCommand::COMMAND_TYPE.to_string(),
            operation_failed: false,
            payload: Some(payload),
        }
    }

    #[test]
    fn removes_from_hosting_agent_and_reports_detached() {
        let inventory = Arc::new(InMemoryMachineInventory::new());
        let machine_id = MachineId::new();
        inventory.record(machine_id, "hv-01");
        let saga = DestroyMachineSaga::new(inventory);
        let header = header();
        let mut data = DestroyMachineSagaData::default();

        let actions = saga
            .initiated(&header, &mut data, DestroyMachineCommand { machine_id })
            .unwrap();
        let SagaAction::StartTask { command, resources, .. } = &actions[0] else {
            panic!("expected remove_vm, got {actions:?}");
        };
        let remove: RemoveVmCommand = command.decode().unwrap();
        assert_eq!(remove.agent_name, "hv-01");
        assert_eq!(resources, &vec![Resource::machine(machine_id)]);

        let disk = Resource::new(ResourceId::new(), ResourceType::VirtualDisk);
        let event = removed(serde_json::json!({ "detached": [disk] }));
        let actions = saga.task_status(&header, &mut data, &event).unwrap();

        let expected = DestroyResourcesResponse {
            destroyed_resources: vec![Resource::machine(machine_id)],
            detached_resources: vec![disk],
        };
        assert_eq!(actions, vec![SagaAction::complete_with(&expected).unwrap()]);
        assert!(saga.task_status(&header, &mut data, &event).unwrap().is_empty());
    }

    #[test]
    fn failed_removal_fails_with_original_payload() {
        let inventory = Arc::new(InMemoryMachineInventory::new());
        let machine_id = MachineId::new();
        inventory.record(machine_id, "hv-01");
        let saga = DestroyMachineSaga::new(inventory);
        let header = header();
        let mut data = DestroyMachineSagaData::default();
        saga.initiated(&header, &mut data, DestroyMachineCommand { machine_id })
            .unwrap();

        let error = ErrorData::new("vm is locked by a backup job").into_json();
        let event = OperationTaskStatusEvent {
            operation_failed: true,
            ..removed(error.clone())
        };
        let actions = saga.task_status(&header, &mut data, &event).unwrap();

        assert_eq!(actions, vec![SagaAction::Fail { payload: Some(error) }]);
        assert!(!data.removed);
    }

    #[test]
    fn unknown_machine_completes_as_destroyed() {
        let saga = DestroyMachineSaga::new(Arc::new(InMemoryMachineInventory::new()));
        let machine_id = MachineId::new();
        let mut data = DestroyMachineSagaData::default();

        let actions = saga
            .initiated(&header(), &mut data, DestroyMachineCommand { machine_id })
            .unwrap();

        let expected = DestroyResourcesResponse {
            destroyed_resources: vec![Resource::machine(machine_id)],
            detached_resources: Vec::new(),
        };
        assert_eq!(actions, vec![SagaAction::complete_with(&expected).unwrap()]);
    }
}
