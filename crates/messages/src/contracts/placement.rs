//! Placement verification round-trip between the controller and an agent.
//!
//! The `correlation_id` is generated per attempt. It lets the placement saga
//! tell the answer to its current request apart from late answers to earlier,
//! already-abandoned attempts.

use serde::{Deserialize, Serialize};

use vmflow_core::{CorrelationId, OperationId, TaskId};
use vmflow_machines::MachineConfig;

/// Ask an agent whether it can really host `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyPlacementCalculationCommand {
    pub correlation_id: CorrelationId,
    pub operation_id: OperationId,
    pub task_id: TaskId,
    pub agent_name: String,
    pub config: MachineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementVerificationCompletedEvent {
    pub correlation_id: CorrelationId,
    pub operation_id: OperationId,
    pub task_id: TaskId,
    pub agent_name: String,
    pub confirmed: bool,
}

impl PlacementVerificationCompletedEvent {
    pub fn answer(request: &VerifyPlacementCalculationCommand, confirmed: bool) -> Self {
        Self {
            correlation_id: request.correlation_id,
            operation_id: request.operation_id,
            task_id: request.task_id,
            agent_name: request.agent_name.clone(),
            confirmed,
        }
    }
}
