//! Virtual machine commands and their results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vmflow_core::{MachineId, Resource};
use vmflow_machines::MachineConfig;

use crate::command::{AgentCommand, TaskCommand};

/// Create a new virtual machine (top-level workflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMachineCommand {
    pub config: MachineConfig,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl TaskCommand for CreateMachineCommand {
    const COMMAND_TYPE: &'static str = "create_machine";

    fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }
}

/// Normalize and validate a machine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateMachineConfigCommand {
    pub config: MachineConfig,
    /// Set when validating a change to an existing machine.
    #[serde(default)]
    pub machine_id: Option<MachineId>,
}

impl TaskCommand for ValidateMachineConfigCommand {
    const COMMAND_TYPE: &'static str = "validate_machine_config";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateMachineConfigResult {
    pub config: MachineConfig,
}

/// Choose the agent that will host a new machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceVirtualMachineCommand {
    pub config: MachineConfig,
}

impl TaskCommand for PlaceVirtualMachineCommand {
    const COMMAND_TYPE: &'static str = "place_virtual_machine";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceVirtualMachineResult {
    pub agent_name: String,
}

/// Make the parent image available on the chosen agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareVirtualMachineImageCommand {
    pub agent_name: String,
    pub image: String,
}

impl TaskCommand for PrepareVirtualMachineImageCommand {
    const COMMAND_TYPE: &'static str = "prepare_virtual_machine_image";
}

impl AgentCommand for PrepareVirtualMachineImageCommand {
    fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

/// Converge a machine on its agent to `config`.
///
/// Without a `machine_id` the agent creates the machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateVirtualMachineCommand {
    pub agent_name: String,
    #[serde(default)]
    pub machine_id: Option<MachineId>,
    pub config: MachineConfig,
}

impl TaskCommand for UpdateVirtualMachineCommand {
    const COMMAND_TYPE: &'static str = "update_virtual_machine";
}

impl AgentCommand for UpdateVirtualMachineCommand {
    fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergeVirtualMachineResult {
    pub machine_id: MachineId,
}

/// Apply a new configuration to an existing machine (top-level workflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMachineCommand {
    pub machine_id: MachineId,
    pub config: MachineConfig,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl TaskCommand for UpdateMachineCommand {
    const COMMAND_TYPE: &'static str = "update_machine";

    fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    fn with_resource(&self, resource: &Resource) -> Self {
        let mut command = self.clone();
        if let Some(machine_id) = resource.machine_id() {
            command.machine_id = machine_id;
        }
        command
    }
}

/// Destroy a single machine (workflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyMachineCommand {
    pub machine_id: MachineId,
}

impl TaskCommand for DestroyMachineCommand {
    const COMMAND_TYPE: &'static str = "destroy_machine";

    fn with_resource(&self, resource: &Resource) -> Self {
        match resource.machine_id() {
            Some(machine_id) => Self { machine_id },
            None => self.clone(),
        }
    }
}

/// Remove a machine from the agent that hosts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveVmCommand {
    pub agent_name: String,
    pub machine_id: MachineId,
}

impl TaskCommand for RemoveVmCommand {
    const COMMAND_TYPE: &'static str = "remove_vm";
}

impl AgentCommand for RemoveVmCommand {
    fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

/// Resources (disks, adapters) that were detached while removing a machine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoveVmResult {
    #[serde(default)]
    pub detached: Vec<Resource>,
}
