//! Controller: consumer of the controller queue.
//!
//! ```text
//! CreateOperation / CreateTask
//!   ├─ agent command      ──▶ forward to {prefix}.{agent}
//!   ├─ workflow command   ──▶ accept (saga starts on the accepted event)
//!   ├─ local command      ──▶ accept, run handler, report status
//!   └─ unknown / broken   ──▶ report failed status
//!
//! TaskAccepted        ──▶ task Running, root task starts the operation, saga engine
//! TaskStatus          ──▶ task finished, root task finishes the operation, saga engine
//! PlacementVerified   ──▶ saga engine
//! ```
//!
//! Accepted/status events are sent back through the controller queue, so the
//! bookkeeping above is the same whether a task ran on an agent or in-process.

use std::io;

use thiserror::Error;
use tracing::{debug, info, warn};

use vmflow_messages::{
    Address, CommandRegistry, CommandRoute, CreateNewOperationTaskCommand, ErrorData, Message,
    MessageBus, MessageEnvelope, OperationTaskAcceptedEvent, OperationTaskStatusEvent,
};

use crate::config::OrchestratorConfig;
use crate::handlers::LocalHandlers;
use crate::operation_store::{OperationStore, OperationStoreError};
use crate::saga::{EngineError, SagaEngine};
use crate::saga_store::SagaStore;
use crate::workers::{MessageWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] OperationStoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("message could not be sent: {0}")]
    Publish(String),
}

pub struct Controller<O, G, B> {
    operations: O,
    engine: SagaEngine<G, O, B>,
    commands: CommandRegistry,
    handlers: LocalHandlers,
    bus: B,
    config: OrchestratorConfig,
}

impl<O, G, B> Controller<O, G, B>
where
    O: OperationStore,
    G: SagaStore,
    B: MessageBus<MessageEnvelope> + Clone,
{
    pub fn new(
        operations: O,
        engine: SagaEngine<G, O, B>,
        commands: CommandRegistry,
        handlers: LocalHandlers,
        bus: B,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            operations,
            engine,
            commands,
            handlers,
            bus,
            config,
        }
    }

    pub fn engine(&self) -> &SagaEngine<G, O, B> {
        &self.engine
    }

    pub fn address(&self) -> Address {
        self.config.controller_address()
    }

    /// Consume the controller queue on a background thread.
    pub fn spawn(self) -> io::Result<WorkerHandle>
    where
        O: 'static,
        G: 'static,
        B: 'static,
    {
        let queue = self.address();
        let bus = self.bus.clone();
        MessageWorker::spawn("vmflow-controller", &bus, &queue, move |envelope: MessageEnvelope| {
            self.handle(envelope)
        })
    }

    pub fn handle(&self, envelope: MessageEnvelope) -> Result<(), ControllerError> {
        let message_id = envelope.message_id();
        let message = envelope.into_body();
        debug!(%message_id, kind = message.kind(), "controller message");

        match message {
            Message::CreateOperation(create) => self.create_task(create.task_message),
            Message::CreateTask(task) => self.create_task(task),
            Message::TaskAccepted(event) => self.task_accepted(&event),
            Message::TaskStatus(event) => self.task_status(&event),
            Message::PlacementVerified(event) => {
                self.engine.handle_placement_verified(&event)?;
                Ok(())
            }
            Message::VerifyPlacement(request) => {
                warn!(
                    operation_id = %request.operation_id,
                    agent = %request.agent_name,
                    "placement verification request reached the controller; dropping"
                );
                Ok(())
            }
        }
    }

    fn create_task(&self, task: CreateNewOperationTaskCommand) -> Result<(), ControllerError> {
        let route = match self.commands.route(&task.command) {
            Ok(route) => route,
            Err(err) => {
                warn!(
                    operation_id = %task.operation_id,
                    task_id = %task.task_id,
                    command_type = %task.command_type(),
                    error = %err,
                    "task cannot be routed"
                );
                return self.report(OperationTaskStatusEvent::failed(
                    &task,
                    ErrorData::new(err.to_string()),
                ));
            }
        };

        match route {
            CommandRoute::Agent(agent_name) => {
                let destination = self.config.agent_address(&agent_name);
                debug!(
                    operation_id = %task.operation_id,
                    task_id = %task.task_id,
                    command_type = %task.command_type(),
                    %destination,
                    "forwarding task to agent"
                );
                self.send(&destination, Message::CreateTask(task))
            }
            CommandRoute::Controller => self.run_locally(task),
        }
    }

    fn run_locally(&self, task: CreateNewOperationTaskCommand) -> Result<(), ControllerError> {
        let command_type = task.command_type().to_string();
        let handler = self.handlers.get(&command_type);

        if handler.is_none() && !self.engine.handles(&command_type) {
            warn!(
                operation_id = %task.operation_id,
                task_id = %task.task_id,
                command_type = %command_type,
                "no workflow or handler for controller command"
            );
            return self.report(OperationTaskStatusEvent::failed(
                &task,
                ErrorData::new(format!("no handler registered for '{command_type}'")),
            ));
        }

        let accepted = OperationTaskAcceptedEvent::accepted_by(self.config.controller_name.clone(), &task);
        self.send(&self.address(), Message::TaskAccepted(accepted))?;

        // Workflows continue from the accepted event.
        let Some(handler) = handler else {
            return Ok(());
        };

        let status = match handler.handle(&task.command) {
            Ok(payload) => OperationTaskStatusEvent::completed(&task, payload),
            Err(error) => {
                info!(
                    operation_id = %task.operation_id,
                    task_id = %task.task_id,
                    command_type = %command_type,
                    error = %error,
                    "local command failed"
                );
                OperationTaskStatusEvent::failed(&task, error)
            }
        };
        self.report(status)
    }

    fn task_accepted(&self, event: &OperationTaskAcceptedEvent) -> Result<(), ControllerError> {
        let operation_id = event.operation_id;
        if self
            .operations
            .accept_task(operation_id, event.task_id, &event.agent_name)?
        {
            self.operations.log(
                operation_id,
                Some(event.task_id),
                &format!(
                    "{} accepted by {}",
                    event.command.command_type, event.agent_name
                ),
            )?;
        }

        if event.parent_task_id.is_none() && self.operations.start(operation_id)? {
            info!(%operation_id, command_type = %event.command.command_type, "operation running");
        }

        self.engine.handle_accepted(event)?;
        Ok(())
    }

    fn task_status(&self, event: &OperationTaskStatusEvent) -> Result<(), ControllerError> {
        let operation_id = event.operation_id;
        let finished = self
            .operations
            .finish_task(operation_id, event.task_id, event.operation_failed)?;

        if finished {
            let outcome = if event.operation_failed { "failed" } else { "completed" };
            let message = match event.error() {
                Some(error) if event.operation_failed => {
                    format!("{} {outcome}: {error}", event.command_type)
                }
                _ => format!("{} {outcome}", event.command_type),
            };
            self.operations.log(operation_id, Some(event.task_id), &message)?;
        }

        if event.parent_task_id.is_none()
            && self
                .operations
                .finish(operation_id, event.operation_failed, event.payload.clone())?
        {
            info!(
                %operation_id,
                command_type = %event.command_type,
                failed = event.operation_failed,
                "operation finished"
            );
        }

        self.engine.handle_status(event)?;
        Ok(())
    }

    fn report(&self, status: OperationTaskStatusEvent) -> Result<(), ControllerError> {
        self.send(&self.address(), Message::TaskStatus(status))
    }

    fn send(&self, destination: &Address, message: Message) -> Result<(), ControllerError> {
        self.bus
            .send(destination, MessageEnvelope::new(message))
            .map_err(|e| ControllerError::Publish(format!("{e:?}")))
    }
}
