//! Apply a new configuration to an existing machine.
//!
//! Validate the config, then converge the machine on the agent that hosts it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use vmflow_core::MachineId;
use vmflow_machines::MachineConfig;
use vmflow_messages::contracts::{
    ConvergeVirtualMachineResult, UpdateMachineCommand, UpdateVirtualMachineCommand,
    ValidateMachineConfigCommand, ValidateMachineConfigResult,
};
use vmflow_messages::{
    ErrorData, OperationTaskStatusEvent, SagaAction, SagaHeader, Workflow, WorkflowResult,
    fail_or_run,
};

use crate::inventory::MachineInventory;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateMachineSagaData {
    pub machine_id: Option<MachineId>,
    pub config: MachineConfig,
    pub agent_name: Option<String>,
    pub validated: bool,
    pub updated: bool,
}

pub struct UpdateMachineSaga {
    inventory: Arc<dyn MachineInventory>,
}

impl UpdateMachineSaga {
    pub fn new(inventory: Arc<dyn MachineInventory>) -> Self {
        Self { inventory }
    }
}

impl Workflow for UpdateMachineSaga {
    type Command = UpdateMachineCommand;
    type Data = UpdateMachineSagaData;

    fn saga_type() -> &'static str {
        "saga.update_machine"
    }

    fn initiated(
        &self,
        _saga: &SagaHeader,
        data: &mut UpdateMachineSagaData,
        command: UpdateMachineCommand,
    ) -> WorkflowResult<Vec<SagaAction>> {
        data.machine_id = Some(command.machine_id);
        data.config = command.config.clone();
        Ok(vec![SagaAction::start_task(&ValidateMachineConfigCommand {
            config: command.config,
            machine_id: Some(command.machine_id),
        })?])
    }

    fn task_status(
        &self,
        saga: &SagaHeader,
        data: &mut UpdateMachineSagaData,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        if !data.validated && event.is_for::<ValidateMachineConfigCommand>() {
            return fail_or_run(event, |validated: ValidateMachineConfigResult| {
                data.validated = true;
                data.config = validated.config;

                let Some(machine_id) = data.machine_id else {
                    return Ok(vec![SagaAction::fail(ErrorData::new(
                        "update has no target machine",
                    ))]);
                };
                let Some(agent_name) = self.inventory.agent_of(machine_id) else {
                    return Ok(vec![SagaAction::fail(ErrorData::new(format!(
                        "machine {machine_id} is not hosted by any known agent"
                    )))]);
                };

                data.agent_name = Some(agent_name.clone());
                Ok(vec![SagaAction::start_task(&UpdateVirtualMachineCommand {
                    agent_name,
                    machine_id: Some(machine_id),
                    config: data.config.clone(),
                })?])
            });
        }

        if data.validated && !data.updated && event.is_for::<UpdateVirtualMachineCommand>() {
            return fail_or_run(event, |converged: ConvergeVirtualMachineResult| {
                data.updated = true;
                Ok(vec![SagaAction::complete_with(&converged)?])
            });
        }

        debug!(
            operation_id = %saga.operation_id,
            command_type = %event.command_type,
            "status not expected in this state; ignoring"
        );
        Ok(Vec::new())
    }
}
