use tracing::{debug, info};

use vmflow_core::{Operation, OperationId, OperationTask, Resource, TaskId};
use vmflow_messages::{
    Address, CommandEnvelope, CreateNewOperationTaskCommand, CreateOperationCommand, Message,
    MessageBus, MessageEnvelope, TaskCommand,
};

use super::DispatchError;
use crate::operation_store::{OperationStore, OperationStoreError};

/// Entry point for command producers: starts new top-level operations.
///
/// ## Correlation
///
/// A command carrying a correlation id reuses it as the operation id, so a
/// resubmitted command finds its existing operation and starts nothing new.
/// This holds for concurrent resubmissions too: an operation another caller
/// inserted first is skipped, not reported as an error.
///
/// ## Fan-out
///
/// With more than one resource, a command that does not declare itself
/// resource-collection-aware is split into one operation per resource, each
/// with a private copy of the command targeting that resource. Correlated
/// fan-out derives each operation id from (correlation id, resource id).
#[derive(Debug)]
pub struct OperationDispatcher<S, B> {
    store: S,
    bus: B,
    controller: Address,
}

struct Planned<C> {
    operation_id: OperationId,
    command: C,
    resources: Vec<Resource>,
}

impl<S, B> OperationDispatcher<S, B> {
    pub fn new(store: S, bus: B, controller: Address) -> Self {
        Self {
            store,
            bus,
            controller,
        }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> OperationDispatcher<S, B>
where
    S: OperationStore,
    B: MessageBus<MessageEnvelope>,
{
    /// Start the operation(s) for `command`.
    ///
    /// Returns the operations created by this call; operations that already
    /// existed for a correlated command are skipped and not returned.
    pub fn start_new<C: TaskCommand>(
        &self,
        command: &C,
        resources: &[Resource],
    ) -> Result<Vec<Operation>, DispatchError> {
        let mut planned_ops = Vec::new();

        for planned in plan(command, resources) {
            if self.store.get(planned.operation_id)?.is_some() {
                debug!(
                    operation_id = %planned.operation_id,
                    command_type = C::COMMAND_TYPE,
                    "operation already exists; not starting it again"
                );
                continue;
            }

            let task_id = TaskId::new();
            let operation = Operation::new(
                planned.operation_id,
                OperationTask::new(task_id, None, C::COMMAND_TYPE),
                &planned.resources,
            );
            let message = CreateOperationCommand {
                task_message: CreateNewOperationTaskCommand {
                    operation_id: planned.operation_id,
                    task_id,
                    parent_task_id: None,
                    command: CommandEnvelope::wrap(&planned.command)?,
                },
            };
            planned_ops.push((operation, message));
        }

        if planned_ops.is_empty() {
            return Ok(Vec::new());
        }

        // 1) Persist all rows in one transaction
        let inserted = self.insert(planned_ops)?;

        // 2) Send after commit
        let mut created = Vec::with_capacity(inserted.len());
        for (operation, message) in inserted {
            self.bus
                .send(
                    &self.controller,
                    MessageEnvelope::new(Message::CreateOperation(message)),
                )
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
            info!(
                operation_id = %operation.id(),
                command_type = C::COMMAND_TYPE,
                "operation created"
            );
            created.push(operation);
        }

        Ok(created)
    }

    /// Insert the planned operations, dropping any that a concurrent caller
    /// inserted between our lookup and this insert.
    fn insert(
        &self,
        planned: Vec<(Operation, CreateOperationCommand)>,
    ) -> Result<Vec<(Operation, CreateOperationCommand)>, DispatchError> {
        let operations = planned.iter().map(|(op, _)| op.clone()).collect();
        match self.store.insert(operations) {
            Ok(()) => return Ok(planned),
            Err(OperationStoreError::Duplicate(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let mut inserted = Vec::with_capacity(planned.len());
        for (operation, message) in planned {
            match self.store.insert(vec![operation.clone()]) {
                Ok(()) => inserted.push((operation, message)),
                Err(OperationStoreError::Duplicate(operation_id)) => {
                    debug!(%operation_id, "operation started concurrently; not starting it again");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(inserted)
    }
}

fn plan<C: TaskCommand>(command: &C, resources: &[Resource]) -> Vec<Planned<C>> {
    let correlation = command.correlation_id();

    if C::RESOURCE_COLLECTION || resources.len() <= 1 {
        let command = match resources {
            [] => command.clone(),
            _ if C::RESOURCE_COLLECTION => command.with_resources(resources),
            [single] => command.with_resource(single),
            _ => command.clone(),
        };
        return vec![Planned {
            operation_id: correlation.map_or_else(OperationId::new, OperationId::from_uuid),
            command,
            resources: resources.to_vec(),
        }];
    }

    resources
        .iter()
        .map(|resource| Planned {
            operation_id: match correlation {
                Some(correlation) => OperationId::derived(correlation, resource.id),
                None => OperationId::new(),
            },
            command: command.with_resource(resource),
            resources: vec![*resource],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use vmflow_core::{MachineId, OperationStatus};
    use vmflow_machines::MachineConfig;
    use vmflow_messages::InMemoryMessageBus;
    use vmflow_messages::contracts::{
        DestroyMachineCommand, DestroyResourcesCommand, UpdateMachineCommand,
    };

    use crate::operation_store::InMemoryOperationStore;

    type Bus = Arc<InMemoryMessageBus<MessageEnvelope>>;

    fn setup() -> (
        OperationDispatcher<Arc<InMemoryOperationStore>, Bus>,
        Arc<InMemoryOperationStore>,
        Bus,
    ) {
        let store = Arc::new(InMemoryOperationStore::new());
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let dispatcher =
            OperationDispatcher::new(store.clone(), bus.clone(), Address::queue("controller"));
        (dispatcher, store, bus)
    }

    fn sent(bus: &Bus) -> Vec<CreateOperationCommand> {
        bus.subscribe(&Address::queue("controller"))
            .drain()
            .into_iter()
            .filter_map(|env| match env.into_body() {
                Message::CreateOperation(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn creates_queued_operation_then_sends() {
        let (dispatcher, store, bus) = setup();
        let machine = MachineId::new();
        let command = DestroyMachineCommand {
            machine_id: MachineId::new(),
        };

        let created = dispatcher
            .start_new(&command, &[Resource::machine(machine)])
            .unwrap();

        assert_eq!(created.len(), 1);
        let stored = store.get(created[0].id()).unwrap().unwrap();
        assert_eq!(stored.status(), OperationStatus::Queued);
        assert_eq!(stored.resources().len(), 1);

        let messages = sent(&bus);
        assert_eq!(messages.len(), 1);
        let decoded: DestroyMachineCommand = messages[0].task_message.command.decode().unwrap();
        assert_eq!(decoded.machine_id, machine);
        assert_eq!(
            Some(messages[0].task_message.task_id),
            stored.root_task().map(|t| t.id)
        );
    }

    #[test]
    fn correlated_command_starts_once() {
        let (dispatcher, store, bus) = setup();
        let correlation = uuid::Uuid::now_v7();
        let command = DestroyResourcesCommand {
            resources: vec![],
            correlation_id: Some(correlation),
        };
        let resources = [Resource::machine(MachineId::new())];

        let first = dispatcher.start_new(&command, &resources).unwrap();
        let second = dispatcher.start_new(&command, &resources).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id(), OperationId::from_uuid(correlation));
        assert!(second.is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(sent(&bus).len(), 1);
    }

    #[test]
    fn collection_command_keeps_all_resources_in_one_operation() {
        let (dispatcher, _store, bus) = setup();
        let resources = [
            Resource::machine(MachineId::new()),
            Resource::machine(MachineId::new()),
        ];
        let command = DestroyResourcesCommand {
            resources: vec![],
            correlation_id: None,
        };

        let created = dispatcher.start_new(&command, &resources).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].resources().len(), 2);
        let messages = sent(&bus);
        let decoded: DestroyResourcesCommand = messages[0].task_message.command.decode().unwrap();
        assert_eq!(decoded.resources, resources.to_vec());
    }

    #[test]
    fn single_resource_command_fans_out() {
        let (dispatcher, store, bus) = setup();
        let a = MachineId::new();
        let b = MachineId::new();
        let command = DestroyMachineCommand {
            machine_id: MachineId::new(),
        };

        let created = dispatcher
            .start_new(&command, &[Resource::machine(a), Resource::machine(b)])
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(store.len(), 2);
        let targets: Vec<MachineId> = sent(&bus)
            .iter()
            .map(|m| m.task_message.command.decode::<DestroyMachineCommand>().unwrap().machine_id)
            .collect();
        assert_eq!(targets, vec![a, b]);
    }

    /// Store whose lookups never see existing operations, as if another caller
    /// inserted them right after the lookup.
    struct LateLookups(Arc<InMemoryOperationStore>);

    impl OperationStore for LateLookups {
        fn insert(&self, operations: Vec<Operation>) -> Result<(), OperationStoreError> {
            self.0.insert(operations)
        }

        fn get(&self, _id: OperationId) -> Result<Option<Operation>, OperationStoreError> {
            Ok(None)
        }

        fn attach_resources(
            &self,
            id: OperationId,
            resources: &[Resource],
        ) -> Result<Vec<vmflow_core::OperationResource>, OperationStoreError> {
            self.0.attach_resources(id, resources)
        }

        fn add_task(&self, id: OperationId, task: OperationTask) -> Result<bool, OperationStoreError> {
            self.0.add_task(id, task)
        }

        fn accept_task(&self, id: OperationId, task_id: TaskId, agent_name: &str) -> Result<bool, OperationStoreError> {
            self.0.accept_task(id, task_id, agent_name)
        }

        fn finish_task(&self, id: OperationId, task_id: TaskId, failed: bool) -> Result<bool, OperationStoreError> {
            self.0.finish_task(id, task_id, failed)
        }

        fn start(&self, id: OperationId) -> Result<bool, OperationStoreError> {
            self.0.start(id)
        }

        fn finish(
            &self,
            id: OperationId,
            failed: bool,
            result: Option<serde_json::Value>,
        ) -> Result<bool, OperationStoreError> {
            self.0.finish(id, failed, result)
        }

        fn log(&self, id: OperationId, task_id: Option<TaskId>, message: &str) -> Result<(), OperationStoreError> {
            self.0.log(id, task_id, message)
        }
    }

    #[test]
    fn concurrent_resubmission_is_not_an_error() {
        let store = Arc::new(InMemoryOperationStore::new());
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let dispatcher =
            OperationDispatcher::new(LateLookups(store.clone()), bus.clone(), Address::queue("controller"));
        let command = DestroyResourcesCommand {
            resources: vec![],
            correlation_id: Some(uuid::Uuid::now_v7()),
        };
        let resources = [Resource::machine(MachineId::new())];

        assert_eq!(dispatcher.start_new(&command, &resources).unwrap().len(), 1);
        assert!(dispatcher.start_new(&command, &resources).unwrap().is_empty());

        assert_eq!(store.len(), 1);
        assert_eq!(sent(&bus).len(), 1);
    }

    #[test]
    fn concurrent_fan_out_starts_only_the_missing_operations() {
        let store = Arc::new(InMemoryOperationStore::new());
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let dispatcher =
            OperationDispatcher::new(LateLookups(store.clone()), bus.clone(), Address::queue("controller"));
        let correlation = uuid::Uuid::now_v7();
        let (a, b) = (MachineId::new(), MachineId::new());
        let command = UpdateMachineCommand {
            machine_id: MachineId::new(),
            config: MachineConfig::named("web"),
            correlation_id: Some(correlation),
        };
        let resources = [Resource::machine(a), Resource::machine(b)];

        let first = Operation::new(
            OperationId::derived(correlation, resources[0].id),
            OperationTask::new(TaskId::new(), None, UpdateMachineCommand::COMMAND_TYPE),
            &resources[..1],
        );
        store.insert(vec![first]).unwrap();

        let created = dispatcher.start_new(&command, &resources).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id(), OperationId::derived(correlation, resources[1].id));
        assert_eq!(store.len(), 2);
        let messages = sent(&bus);
        assert_eq!(messages.len(), 1);
        let decoded: UpdateMachineCommand = messages[0].task_message.command.decode().unwrap();
        assert_eq!(decoded.machine_id, b);
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn correlated_fan_out_is_stable_and_collision_free(count in 2usize..8, seed in any::<u128>()) {
                let correlation = uuid::Uuid::from_u128(seed);
                let resources: Vec<Resource> = (0..count).map(|_| Resource::machine(MachineId::new())).collect();
                let command = UpdateMachineCommand {
                    machine_id: MachineId::new(),
                    config: MachineConfig::named("web"),
                    correlation_id: Some(correlation),
                };

                let first: Vec<OperationId> = plan(&command, &resources).iter().map(|p| p.operation_id).collect();
                let again: Vec<OperationId> = plan(&command, &resources).iter().map(|p| p.operation_id).collect();

                prop_assert_eq!(&first, &again);
                let unique: std::collections::HashSet<_> = first.iter().collect();
                prop_assert_eq!(unique.len(), count);

                for (planned, resource) in plan(&command, &resources).iter().zip(&resources) {
                    prop_assert_eq!(Some(planned.command.machine_id), resource.machine_id());
                    prop_assert_eq!(&planned.resources, &vec![*resource]);
                }
            }
        }
    }
}
