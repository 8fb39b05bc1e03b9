//! Create a virtual machine.
//!
//! ```text
//! Initiated ──validate──▶ ConfigValidated ──place──▶ Placed ──prepare image──▶ ImagePrepared ──converge──▶ Created
//! ```
//!
//! Any failed step fails the saga with the step's error. A machine without a
//! parent image skips the image step.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vmflow_core::{MachineId, Resource};
use vmflow_machines::MachineConfig;
use vmflow_messages::contracts::{
    ConvergeVirtualMachineResult, CreateMachineCommand, PlaceVirtualMachineCommand,
    PlaceVirtualMachineResult, PrepareVirtualMachineImageCommand, UpdateVirtualMachineCommand,
    ValidateMachineConfigCommand, ValidateMachineConfigResult,
};
use vmflow_messages::{
    ErrorData, OperationTaskStatusEvent, SagaAction, SagaHeader, Workflow, WorkflowResult,
    fail_or_run,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateVmState {
    #[default]
    Initiated,
    ConfigValidated,
    Placed,
    ImagePrepared,
    Created,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateMachineSagaData {
    pub state: CreateVmState,
    pub config: MachineConfig,
    pub agent_name: Option<String>,
    pub machine_id: Option<MachineId>,
}

#[derive(Debug, Default)]
pub struct CreateMachineSaga;

impl CreateMachineSaga {
    fn converge(&self, data: &mut CreateMachineSagaData) -> WorkflowResult<Vec<SagaAction>> {
        data.state = CreateVmState::ImagePrepared;
        let Some(agent_name) = data.agent_name.clone() else {
            return Ok(vec![SagaAction::fail(ErrorData::new(format!(
                "machine '{}' has no agent assigned",
                data.config.name
            )))]);
        };
        Ok(vec![SagaAction::start_task(&UpdateVirtualMachineCommand {
            agent_name,
            machine_id: None,
            config: data.config.clone(),
        })?])
    }
}

impl Workflow for CreateMachineSaga {
    type Command = CreateMachineCommand;
    type Data = CreateMachineSagaData;

    fn saga_type() -> &'static str {
        "saga.create_machine"
    }

    fn initiated(
        &self,
        _saga: &SagaHeader,
        data: &mut CreateMachineSagaData,
        command: CreateMachineCommand,
    ) -> WorkflowResult<Vec<SagaAction>> {
        data.config = command.config.clone();
        Ok(vec![SagaAction::start_task(&ValidateMachineConfigCommand {
            config: command.config,
            machine_id: None,
        })?])
    }

    fn task_status(
        &self,
        _saga: &SagaHeader,
        data: &mut CreateMachineSagaData,
        event: &OperationTaskStatusEvent,
    ) -> WorkflowResult<Vec<SagaAction>> {
        match data.state {
            CreateVmState::Initiated if event.is_for::<ValidateMachineConfigCommand>() => {
                fail_or_run(event, |validated: ValidateMachineConfigResult| {
                    data.config = validated.config;
                    data.state = CreateVmState::ConfigValidated;
                    Ok(vec![SagaAction::start_task(&PlaceVirtualMachineCommand {
                        config: data.config.clone(),
                    })?])
                })
            }
            CreateVmState::ConfigValidated if event.is_for::<PlaceVirtualMachineCommand>() => {
                fail_or_run(event, |placed: PlaceVirtualMachineResult| {
                    data.agent_name = Some(placed.agent_name.clone());
                    data.state = CreateVmState::Placed;
                    match data.config.image.clone() {
                        Some(image) => Ok(vec![SagaAction::start_task(
                            &PrepareVirtualMachineImageCommand {
                                agent_name: placed.agent_name,
                                image,
                            },
                        )?]),
                        None => self.converge(data),
                    }
                })
            }
            CreateVmState::Placed if event.is_for::<PrepareVirtualMachineImageCommand>() => {
                fail_or_run(event, |_: IgnoredAny| self.converge(data))
            }
            CreateVmState::ImagePrepared if event.is_for::<UpdateVirtualMachineCommand>() => {
                fail_or_run(event, |created: ConvergeVirtualMachineResult| {
                    data.machine_id = Some(created.machine_id);
                    data.state = CreateVmState::Created;
                    let mut actions = vec![SagaAction::AttachResources(vec![Resource::machine(
                        created.machine_id,
                    )])];
                    if let Some(agent_name) = data.agent_name.clone() {
                        actions.push(SagaAction::RecordMachine {
                            machine_id: created.machine_id,
                            agent_name,
                        });
                    }
                    actions.push(SagaAction::complete_with(&created)?);
                    Ok(actions)
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
