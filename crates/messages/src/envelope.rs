use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vmflow_core::OperationId;

use crate::contracts::{PlacementVerificationCompletedEvent, VerifyPlacementCalculationCommand};
use crate::task::{
    CreateNewOperationTaskCommand, CreateOperationCommand, OperationTaskAcceptedEvent,
    OperationTaskStatusEvent,
};

/// Everything that travels between the controller and agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    CreateOperation(CreateOperationCommand),
    CreateTask(CreateNewOperationTaskCommand),
    TaskAccepted(OperationTaskAcceptedEvent),
    TaskStatus(OperationTaskStatusEvent),
    VerifyPlacement(VerifyPlacementCalculationCommand),
    PlacementVerified(PlacementVerificationCompletedEvent),
}

impl Message {
    /// Stable name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CreateOperation(_) => "create_operation",
            Message::CreateTask(_) => "create_task",
            Message::TaskAccepted(_) => "task_accepted",
            Message::TaskStatus(_) => "task_status",
            Message::VerifyPlacement(_) => "verify_placement",
            Message::PlacementVerified(_) => "placement_verified",
        }
    }

    pub fn operation_id(&self) -> OperationId {
        match self {
            Message::CreateOperation(m) => m.task_message.operation_id,
            Message::CreateTask(m) => m.operation_id,
            Message::TaskAccepted(m) => m.operation_id,
            Message::TaskStatus(m) => m.operation_id,
            Message::VerifyPlacement(m) => m.operation_id,
            Message::PlacementVerified(m) => m.operation_id,
        }
    }
}

/// Unit of delivery on the bus.
///
/// `message_id` identifies one send; redeliveries of the same send keep it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    message_id: Uuid,
    sent_at: DateTime<Utc>,
    body: Message,
}

impl MessageEnvelope {
    pub fn new(body: Message) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            sent_at: Utc::now(),
            body,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn body(&self) -> &Message {
        &self.body
    }

    pub fn into_body(self) -> Message {
        self.body
    }
}

impl From<Message> for MessageEnvelope {
    fn from(body: Message) -> Self {
        Self::new(body)
    }
}
