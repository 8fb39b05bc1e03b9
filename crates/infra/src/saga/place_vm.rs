//! Place a virtual machine on an agent, verified by the agent itself.
//!
//! Each attempt picks a candidate, generates a fresh correlation id and asks
//! the candidate to verify the placement. A rejection excludes the candidate
//! and tries the next one; attempts are bounded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vmflow_core::CorrelationId;
use vmflow_machines::MachineConfig;
use vmflow_messages::contracts::{
    PlaceVirtualMachineCommand, PlaceVirtualMachineResult, VerifyPlacementCalculationCommand,
};
use vmflow_messages::{Address, ErrorData, Message, SagaAction, SagaHeader, Workflow, WorkflowResult};

use crate::config::OrchestratorConfig;
use crate::placement::PlacementCalculator;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaceVirtualMachineSagaData {
    pub config: MachineConfig,
    /// Correlation id of the verification currently awaited.
    pub correlation_id: Option<CorrelationId>,
    pub candidate: Option<String>,
    /// Agents that refused this placement.
    pub rejected: Vec<String>,
    pub attempts: u32,
}

pub struct PlaceVirtualMachineSaga {
    calculator: Arc<dyn PlacementCalculator>,
    agent_queue_prefix: String,
    max_attempts: u32,
}

impl PlaceVirtualMachineSaga {
    pub fn new(calculator: Arc<dyn PlacementCalculator>, config: &OrchestratorConfig) -> Self {
        Self {
            calculator,
            agent_queue_prefix: config.agent_queue_prefix.clone(),
            max_attempts: config.max_placement_attempts,
        }
    }

    fn try_place(
        &self,
        saga: &SagaHeader,
        data: &mut PlaceVirtualMachineSagaData,
    ) -> WorkflowResult<Vec<SagaAction>> {
        if data.attempts >= self.max_attempts {
            return Ok(vec![SagaAction::fail(
                ErrorData::new(format!(
                    "placement of machine '{}' was not confirmed after {} attempts",
                    data.config.name, data.attempts
                ))
                .with_details(serde_json::json!({ "rejected": data.rejected })),
            )]);
        }

        let Some(agent_name) = self.calculator.calculate(&data.config, &data.rejected) else {
            return Ok(vec![SagaAction::fail(
                ErrorData::new(format!(
                    "no agent has capacity for machine '{}'",
                    data.config.name
                ))
                .with_details(serde_json::json!({ "rejected": data.rejected })),
            )]);
        };

        let correlation_id = CorrelationId::new();
        data.attempts += 1;
        data.correlation_id = Some(correlation_id);
        data.candidate = Some(agent_name.clone());

        debug!(
            operation_id = %saga.operation_id,
            agent = %agent_name,
            attempt = data.attempts,
            "verifying placement"
        );

        Ok(vec![SagaAction::Send {
            destination: Address::agent(&self.agent_queue_prefix, &agent_name),
            message: Message::VerifyPlacement(VerifyPlacementCalculationCommand {
                correlation_id,
                operation_id: saga.operation_id,
                task_id: saga.initiating_task_id,
                agent_name,
                config: data.config.clone(),
            }),
        }])
    }
}

impl Workflow for PlaceVirtualMachineSaga {
    type Command = PlaceVirtualMachineCommand;
    type Data = PlaceVirtualMachineSagaData;

    fn saga_type() -> &'static str {
        "saga.place_virtual_machine"
    }

    fn initiated(
        &self,
        saga: &SagaHeader,
        data: &mut PlaceVirtualMachineSagaData,
        command: PlaceVirtualMachineCommand,
    ) -> WorkflowResult<Vec<SagaAction>> {
        data.config = command.config;
        self.try_place(saga, data)
    }

    fn message(
        &self,
        saga: &SagaHeader,
        data: &mut PlaceVirtualMachineSagaData,
        message: &Message,
    ) -> WorkflowResult<Vec<SagaAction>> {
        let Message::PlacementVerified(verified) = message else {
            return Ok(Vec::new());
        };

        if data.correlation_id != Some(verified.correlation_id) {
            debug!(
                operation_id = %saga.operation_id,
                correlation_id = %verified.correlation_id,
                "verification for an earlier attempt; ignoring"
            );
            return Ok(Vec::new());
        }

        if verified.confirmed {
            info!(
                operation_id = %saga.operation_id,
                agent = %verified.agent_name,
                "placement confirmed"
            );
            return Ok(vec![SagaAction::complete_with(&PlaceVirtualMachineResult {
                agent_name: verified.agent_name.clone(),
            })?]);
        }

        info!(
            operation_id = %saga.operation_id,
            agent = %verified.agent_name,
            "agent rejected placement; recalculating"
        );
        if !data.rejected.contains(&verified.agent_name) {
            data.rejected.push(verified.agent_name.clone());
        }
        data.correlation_id = None;
        data.candidate = None;
        self.try_place(saga, data)
    }
}
