//! Message contracts, transport abstraction and saga mechanics.
//!
//! Everything the controller and agents exchange is defined here, together
//! with the command registry used to decode commands by their stable tag and
//! the workflow trait concrete sagas implement.

pub mod address;
pub mod bus;
pub mod command;
pub mod contracts;
pub mod envelope;
pub mod handler;
pub mod in_memory_bus;
pub mod registry;
pub mod saga;
pub mod task;

pub use address::Address;
pub use bus::{MessageBus, Subscription};
pub use command::{AgentCommand, CommandDecodeError, CommandEnvelope, TaskCommand};
pub use envelope::{Message, MessageEnvelope};
pub use handler::CommandHandler;
pub use in_memory_bus::{InMemoryBusError, InMemoryMessageBus};
pub use registry::{CommandRegistry, CommandRoute, RegistryError};
pub use saga::{
    SagaAction, SagaHeader, SagaStatus, Workflow, WorkflowError, WorkflowResult, fail_or_run,
};
pub use task::{
    CreateNewOperationTaskCommand, CreateOperationCommand, ErrorData, OperationTaskAcceptedEvent,
    OperationTaskStatusEvent,
};
