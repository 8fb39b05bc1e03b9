//! Saga engine: correlation, persistence and action execution.
//!
//! ## Correlation
//!
//! A saga instance is keyed by (operation id, initiating task id):
//!
//! - `TaskAccepted` for a workflow command creates the saga keyed by its task
//! - `TaskStatus` goes to the saga keyed by the event's parent task (the saga
//!   that dispatched the task) and to the saga keyed by the task itself (a
//!   saga whose own task was reported finished)
//! - `PlacementVerified` goes to the saga keyed by the task it names
//!
//! ## Processing one message
//!
//! ```text
//! load record ── outbox not empty ──▶ run and clear it first
//!   ↓
//! missing / terminal ──▶ ignore
//!   ↓
//! run workflow hook on a copy of the data
//!   ↓
//! nothing changed ──▶ done (no save, no revision bump)
//!   ↓
//! save data + actions (outbox) with revision check ── conflict ──▶ reload and re-apply (bounded)
//!   ↓
//! run the outbox (sub-tasks, sends, resource links, status report), then clear it
//! ```
//!
//! Actions run only after the save committed, so a redelivered message finds
//! the advanced data and does not repeat them. An action that fails stays in
//! the outbox with every action after it; the next message for the saga runs
//! them before anything else.

pub mod create_machine;
pub mod destroy_machine;
pub mod destroy_resources;
pub mod place_vm;
pub mod registry;
pub mod update_machine;

pub use create_machine::CreateMachineSaga;
pub use destroy_machine::DestroyMachineSaga;
pub use destroy_resources::DestroyResourcesSaga;
pub use place_vm::PlaceVirtualMachineSaga;
pub use registry::{SagaHandler, Step, WorkflowRegistry};
pub use update_machine::UpdateMachineSaga;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use vmflow_core::{ExpectedRevision, OperationId, TaskId};
use vmflow_messages::{
    Address, ErrorData, Message, MessageBus, MessageEnvelope, OperationTaskAcceptedEvent,
    OperationTaskStatusEvent, SagaAction, SagaHeader, SagaStatus,
    contracts::PlacementVerificationCompletedEvent,
};

use crate::config::OrchestratorConfig;
use crate::dispatcher::{DispatchError, OperationTaskDispatcher};
use crate::inventory::MachineInventory;
use crate::operation_store::OperationStore;
use crate::placement::PlacementCalculator;
use crate::saga_store::{SagaRecord, SagaStore, SagaStoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] SagaStoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("saga {task_id} of operation {operation_id} still conflicting after {attempts} save attempts")]
    ConflictRetriesExhausted {
        operation_id: OperationId,
        task_id: TaskId,
        attempts: u32,
    },

    #[error("message could not be sent: {0}")]
    Publish(String),
}

/// What happened to a saga for one message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// No saga for this message, or the saga is already finished.
    Ignored,
    /// The workflow produced no change; nothing was saved.
    Unchanged,
    /// The saga advanced and its actions ran; `revision` is the stored one.
    Saved { status: SagaStatus, revision: u64 },
}

impl SagaOutcome {
    fn or(self, other: SagaOutcome) -> SagaOutcome {
        match self {
            SagaOutcome::Ignored => other,
            handled => handled,
        }
    }
}

/// Workflows shipped with the orchestrator.
pub fn default_workflows(
    config: &OrchestratorConfig,
    calculator: Arc<dyn PlacementCalculator>,
    inventory: Arc<dyn MachineInventory>,
) -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry
        .register(CreateMachineSaga)
        .register(UpdateMachineSaga::new(inventory.clone()))
        .register(DestroyMachineSaga::new(inventory))
        .register(DestroyResourcesSaga)
        .register(PlaceVirtualMachineSaga::new(calculator, config));
    registry
}

pub struct SagaEngine<G, S, B> {
    sagas: G,
    tasks: OperationTaskDispatcher<S, B>,
    bus: B,
    registry: WorkflowRegistry,
    inventory: Arc<dyn MachineInventory>,
    controller: Address,
    max_save_attempts: u32,
}

impl<G, S, B> SagaEngine<G, S, B>
where
    G: SagaStore,
    S: OperationStore,
    B: MessageBus<MessageEnvelope> + Clone,
{
    pub fn new(
        sagas: G,
        operations: S,
        bus: B,
        registry: WorkflowRegistry,
        inventory: Arc<dyn MachineInventory>,
        config: &OrchestratorConfig,
    ) -> Self {
        let controller = config.controller_address();
        Self {
            sagas,
            tasks: OperationTaskDispatcher::new(operations, bus.clone(), controller.clone()),
            bus,
            registry,
            inventory,
            controller,
            max_save_attempts: config.max_save_attempts,
        }
    }

    /// Whether accepting `command_type` starts a saga.
    pub fn handles(&self, command_type: &str) -> bool {
        self.registry.for_command(command_type).is_some()
    }

    pub fn sagas(&self) -> &G {
        &self.sagas
    }

    /// Start the saga for an accepted workflow command.
    ///
    /// A saga that already exists for the task is left alone, so a redelivered
    /// accepted event never starts the workflow twice.
    pub fn handle_accepted(&self, event: &OperationTaskAcceptedEvent) -> Result<SagaOutcome, EngineError> {
        let Some(handler) = self.registry.for_command(&event.command.command_type) else {
            return Ok(SagaOutcome::Ignored);
        };

        let header = SagaHeader {
            saga_type: handler.saga_type().to_string(),
            operation_id: event.operation_id,
            initiating_task_id: event.task_id,
            parent_task_id: event.parent_task_id,
        };

        self.advance(event.operation_id, event.task_id, Some(header), |h, saga, _| {
            h.initiated(saga, &event.command)
        })
    }

    pub fn handle_status(&self, event: &OperationTaskStatusEvent) -> Result<SagaOutcome, EngineError> {
        let parent = match event.parent_task_id {
            Some(parent) => self.advance(event.operation_id, parent, None, |h, saga, data| {
                h.task_status(saga, data, event)
            })?,
            None => SagaOutcome::Ignored,
        };

        let own = self.advance(event.operation_id, event.task_id, None, |h, saga, data| {
            h.own_status(saga, data, event)
        })?;

        Ok(parent.or(own))
    }

    pub fn handle_placement_verified(
        &self,
        event: &PlacementVerificationCompletedEvent,
    ) -> Result<SagaOutcome, EngineError> {
        let message = Message::PlacementVerified(event.clone());
        self.advance(event.operation_id, event.task_id, None, |h, saga, data| {
            h.message(saga, data, &message)
        })
    }

    fn advance<F>(
        &self,
        operation_id: OperationId,
        task_id: TaskId,
        start: Option<SagaHeader>,
        hook: F,
    ) -> Result<SagaOutcome, EngineError>
    where
        F: Fn(&dyn SagaHandler, &SagaHeader, &JsonValue) -> vmflow_messages::WorkflowResult<Step>,
    {
        for attempt in 1..=self.max_save_attempts {
            let loaded = match self.sagas.load(operation_id, task_id)? {
                Some(record) if !record.outbox.is_empty() => Some(self.flush(record)?),
                loaded => loaded,
            };

            let (record, expected) = match (loaded, &start) {
                (Some(_), Some(_)) => {
                    debug!(%operation_id, %task_id, "saga already started; ignoring");
                    return Ok(SagaOutcome::Ignored);
                }
                (Some(record), None) if record.status.is_terminal() => {
                    debug!(
                        %operation_id,
                        %task_id,
                        saga_type = %record.header.saga_type,
                        "saga already finished; ignoring message"
                    );
                    return Ok(SagaOutcome::Ignored);
                }
                (Some(record), None) => {
                    let revision = record.revision;
                    (record, ExpectedRevision::Exact(revision))
                }
                (None, Some(header)) => (
                    SagaRecord::new(header.clone(), JsonValue::Null),
                    ExpectedRevision::New,
                ),
                (None, None) => return Ok(SagaOutcome::Ignored),
            };

            let Some(handler) = self.registry.for_saga(&record.header.saga_type) else {
                warn!(
                    %operation_id,
                    saga_type = %record.header.saga_type,
                    "no workflow registered for stored saga"
                );
                return Ok(SagaOutcome::Ignored);
            };

            let step = match hook(handler.as_ref(), &record.header, &record.data) {
                Ok(step) => step,
                Err(err) => {
                    warn!(
                        %operation_id,
                        %task_id,
                        saga_type = handler.saga_type(),
                        error = %err,
                        "workflow step failed; failing saga"
                    );
                    Step {
                        data: record.data.clone(),
                        actions: vec![SagaAction::fail(ErrorData::new(err.to_string()))],
                    }
                }
            };

            if expected != ExpectedRevision::New
                && step.actions.is_empty()
                && step.data == record.data
            {
                return Ok(SagaOutcome::Unchanged);
            }

            let mut next = record.clone();
            next.data = step.data;
            if let Some(status) = terminal_status(&step.actions) {
                next.status = status;
            }
            next.outbox = step.actions;

            match self.sagas.save(next, expected) {
                Ok(saved) => {
                    let flushed = self.flush(saved)?;
                    return Ok(SagaOutcome::Saved {
                        status: flushed.status,
                        revision: flushed.revision,
                    });
                }
                Err(SagaStoreError::Concurrency { .. }) => {
                    warn!(
                        %operation_id,
                        %task_id,
                        attempt,
                        "saga revision conflict; re-applying message"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::ConflictRetriesExhausted {
            operation_id,
            task_id,
            attempts: self.max_save_attempts,
        })
    }

    /// Run the stored outbox of `record` and clear it.
    ///
    /// On the first failing action that action and the ones after it are kept
    /// in the outbox and the error is returned.
    fn flush(&self, mut record: SagaRecord) -> Result<SagaRecord, EngineError> {
        let Some(handler) = self.registry.for_saga(&record.header.saga_type) else {
            return Ok(record);
        };

        let pending = std::mem::take(&mut record.outbox);
        for (ran, action) in pending.iter().enumerate() {
            if let Err(err) = self.execute(handler.as_ref(), &record.header, action) {
                warn!(
                    operation_id = %record.operation_id(),
                    task_id = %record.initiating_task_id(),
                    pending = pending.len() - ran,
                    error = %err,
                    "saga action failed; keeping the rest for redelivery"
                );
                if let Err(store_err) = self.store_outbox(record, &pending, pending[ran..].to_vec()) {
                    warn!(error = %store_err, "could not record saga progress");
                }
                return Err(err);
            }
        }

        self.store_outbox(record, &pending, Vec::new())
    }

    /// Replace the outbox `ran` with `remaining`, unless another writer
    /// already moved the saga past it.
    fn store_outbox(
        &self,
        mut record: SagaRecord,
        ran: &[SagaAction],
        remaining: Vec<SagaAction>,
    ) -> Result<SagaRecord, EngineError> {
        let operation_id = record.operation_id();
        let task_id = record.initiating_task_id();

        for _ in 0..self.max_save_attempts {
            let expected = ExpectedRevision::Exact(record.revision);
            record.outbox = remaining.clone();
            match self.sagas.save(record, expected) {
                Ok(saved) => return Ok(saved),
                Err(SagaStoreError::Concurrency { .. }) => {
                    match self.sagas.load(operation_id, task_id)? {
                        Some(current) if current.outbox == ran => record = current,
                        Some(current) => return Ok(current),
                        None => {
                            return Err(SagaStoreError::Storage(format!(
                                "saga {task_id} of operation {operation_id} disappeared"
                            ))
                            .into());
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EngineError::ConflictRetriesExhausted {
            operation_id,
            task_id,
            attempts: self.max_save_attempts,
        })
    }

    fn execute(
        &self,
        handler: &dyn SagaHandler,
        saga: &SagaHeader,
        action: &SagaAction,
    ) -> Result<(), EngineError> {
        match action {
            SagaAction::StartTask {
                task_id,
                command,
                resources,
            } => {
                self.tasks.start_task(
                    saga.operation_id,
                    *task_id,
                    Some(saga.initiating_task_id),
                    command.clone(),
                    resources,
                )?;
            }
            SagaAction::Send {
                destination,
                message,
            } => {
                self.bus
                    .send(destination, MessageEnvelope::new(message.clone()))
                    .map_err(|e| EngineError::Publish(format!("{e:?}")))?;
                debug!(
                    operation_id = %saga.operation_id,
                    destination = %destination,
                    kind = message.kind(),
                    "saga message sent"
                );
            }
            SagaAction::AttachResources(resources) => {
                self.tasks.attach_resources(saga.operation_id, resources)?;
            }
            SagaAction::RecordMachine {
                machine_id,
                agent_name,
            } => {
                self.inventory.record(*machine_id, agent_name);
                debug!(%machine_id, agent_name = %agent_name, "machine placement recorded");
            }
            SagaAction::Complete { payload } => {
                self.report(handler, saga, false, payload.clone())?;
            }
            SagaAction::Fail { payload } => {
                self.report(handler, saga, true, payload.clone())?;
            }
        }
        Ok(())
    }

    /// Emit the status of the saga's initiating task to its parent.
    fn report(
        &self,
        handler: &dyn SagaHandler,
        saga: &SagaHeader,
        failed: bool,
        payload: Option<JsonValue>,
    ) -> Result<(), EngineError> {
        let status = OperationTaskStatusEvent {
            operation_id: saga.operation_id,
            task_id: saga.initiating_task_id,
            parent_task_id: saga.parent_task_id,
            command_type: handler.command_type().to_string(),
            operation_failed: failed,
            payload,
        };
        self.bus
            .send(&self.controller, MessageEnvelope::new(Message::TaskStatus(status)))
            .map_err(|e| EngineError::Publish(format!("{e:?}")))?;

        info!(
            operation_id = %saga.operation_id,
            task_id = %saga.initiating_task_id,
            saga_type = %saga.saga_type,
            failed,
            "saga finished"
        );
        Ok(())
    }
}

fn terminal_status(actions: &[SagaAction]) -> Option<SagaStatus> {
    actions.iter().find_map(|action| match action {
        SagaAction::Complete { .. } => Some(SagaStatus::Completed),
        SagaAction::Fail { .. } => Some(SagaStatus::Failed),
        _ => None,
    })
}
