//! Integration tests for the full orchestration pipeline.
//!
//! Tests: OperationDispatcher → controller queue → Controller → SagaEngine →
//! agent queues → fake agents → controller queue → ...
//!
//! The harness pumps every queue synchronously until all are empty, so each
//! test observes the settled state.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::sync::Arc;

    use vmflow_core::{MachineId, Operation, OperationId, OperationStatus, Resource, TaskState};
    use vmflow_machines::{AgentCapacity, MachineConfig};
    use vmflow_messages::contracts::{
        CreateMachineCommand, DestroyResourcesCommand, DestroyResourcesResponse,
        PlacementVerificationCompletedEvent, UpdateVirtualMachineCommand,
        VerifyPlacementCalculationCommand, default_registry,
    };
    use vmflow_messages::{
        Address, CommandEnvelope, CreateNewOperationTaskCommand, ErrorData, InMemoryMessageBus,
        Message, MessageBus, MessageEnvelope, OperationTaskAcceptedEvent, OperationTaskStatusEvent,
        SagaStatus, Subscription, TaskCommand,
    };

    use crate::config::OrchestratorConfig;
    use crate::controller::Controller;
    use crate::dispatcher::OperationDispatcher;
    use crate::handlers::default_handlers;
    use crate::inventory::{InMemoryMachineInventory, MachineInventory};
    use crate::operation_store::{InMemoryOperationStore, OperationStore};
    use crate::placement::InMemoryPlacementCalculator;
    use crate::saga::{SagaEngine, default_workflows};
    use crate::saga_store::InMemorySagaStore;

    type Bus = Arc<InMemoryMessageBus<MessageEnvelope>>;
    type Operations = Arc<InMemoryOperationStore>;

    /// Scripted agent: accepts every task, answers placement checks.
    struct FakeAgent {
        name: String,
        subscription: Subscription<MessageEnvelope>,
        bus: Bus,
        controller: Address,
        confirm_placement: bool,
        failing: HashSet<&'static str>,
        placement_requests: RefCell<Vec<VerifyPlacementCalculationCommand>>,
    }

    impl FakeAgent {
        fn pump(&self) -> usize {
            let messages = self.subscription.drain();
            let count = messages.len();
            for envelope in messages {
                match envelope.into_body() {
                    Message::CreateTask(task) => self.run(task),
                    Message::VerifyPlacement(request) => {
                        self.reply(Message::PlacementVerified(
                            PlacementVerificationCompletedEvent::answer(&request, self.confirm_placement),
                        ));
                        self.placement_requests.borrow_mut().push(request);
                    }
                    other => panic!("agent {} got unexpected {}", self.name, other.kind()),
                }
            }
            count
        }

        fn run(&self, task: CreateNewOperationTaskCommand) {
            self.reply(Message::TaskAccepted(OperationTaskAcceptedEvent::accepted_by(
                self.name.clone(),
                &task,
            )));

            let command_type = task.command_type().to_string();
            let status = if self.failing.contains(command_type.as_str()) {
                OperationTaskStatusEvent::failed(&task, ErrorData::new(format!("{command_type} failed on {}", self.name)))
            } else if task.command.is::<UpdateVirtualMachineCommand>() {
                let command: UpdateVirtualMachineCommand = task.command.decode().unwrap();
                let machine_id = command.machine_id.unwrap_or_else(MachineId::new);
                OperationTaskStatusEvent::completed(&task, Some(serde_json::json!({ "machine_id": machine_id })))
            } else if command_type == "remove_vm" {
                OperationTaskStatusEvent::completed(&task, Some(serde_json::json!({ "detached": [] })))
            } else {
                OperationTaskStatusEvent::completed(&task, None)
            };
            self.reply(Message::TaskStatus(status));
        }

        fn reply(&self, message: Message) {
            self.bus.send(&self.controller, MessageEnvelope::new(message)).unwrap();
        }
    }

    struct Harness {
        config: OrchestratorConfig,
        bus: Bus,
        operations: Operations,
        inventory: Arc<InMemoryMachineInventory>,
        controller: Controller<Operations, InMemorySagaStore, Bus>,
        dispatcher: OperationDispatcher<Operations, Bus>,
        controller_queue: Subscription<MessageEnvelope>,
        agents: Vec<FakeAgent>,
        /// Command types in the order the controller saw their tasks.
        dispatched: Vec<String>,
    }

    struct Options {
        confirm_placement: bool,
        failing: Vec<&'static str>,
        max_placement_attempts: u32,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                confirm_placement: true,
                failing: Vec::new(),
                max_placement_attempts: 5,
            }
        }
    }

    fn harness(options: Options) -> Harness {
        vmflow_observability::init_for_tests();

        let config = OrchestratorConfig {
            max_placement_attempts: options.max_placement_attempts,
            ..OrchestratorConfig::default()
        };
        let bus: Bus = Arc::new(InMemoryMessageBus::new());
        let operations: Operations = Arc::new(InMemoryOperationStore::new());
        let inventory = Arc::new(InMemoryMachineInventory::new());
        let calculator = Arc::new(InMemoryPlacementCalculator::new(vec![
            AgentCapacity::new("hv-01", 16384, 16),
            AgentCapacity::new("hv-02", 8192, 16),
        ]));

        let engine = SagaEngine::new(
            InMemorySagaStore::new(),
            operations.clone(),
            bus.clone(),
            default_workflows(&config, calculator, inventory.clone()),
            inventory.clone(),
            &config,
        );
        let controller = Controller::new(
            operations.clone(),
            engine,
            default_registry(),
            default_handlers(inventory.clone()),
            bus.clone(),
            config.clone(),
        );
        let dispatcher = OperationDispatcher::new(operations.clone(), bus.clone(), config.controller_address());

        let agents = ["hv-01", "hv-02"]
            .into_iter()
            .map(|name| FakeAgent {
                name: name.to_string(),
                subscription: bus.subscribe(&config.agent_address(name)),
                bus: bus.clone(),
                controller: config.controller_address(),
                confirm_placement: options.confirm_placement,
                failing: options.failing.iter().copied().collect(),
                placement_requests: RefCell::new(Vec::new()),
            })
            .collect();

        Harness {
            controller_queue: bus.subscribe(&config.controller_address()),
            config,
            bus,
            operations,
            inventory,
            controller,
            dispatcher,
            agents,
            dispatched: Vec::new(),
        }
    }

    impl Harness {
        /// Deliver messages until every queue is empty.
        fn settle(&mut self) {
            for _ in 0..1_000 {
                let mut progressed = 0;
                for envelope in self.controller_queue.drain() {
                    match envelope.body() {
                        Message::CreateOperation(create) => {
                            self.dispatched.push(create.task_message.command_type().to_string())
                        }
                        Message::CreateTask(task) => self.dispatched.push(task.command_type().to_string()),
                        _ => {}
                    }
                    self.controller.handle(envelope).unwrap();
                    progressed += 1;
                }
                for agent in &self.agents {
                    progressed += agent.pump();
                }
                if progressed == 0 {
                    return;
                }
            }
            panic!("pipeline did not settle");
        }

        fn start<C: TaskCommand>(&mut self, command: &C, resources: &[Resource]) -> Vec<Operation> {
            let created = self.dispatcher.start_new(command, resources).unwrap();
            self.settle();
            created
        }

        fn operation(&self, id: OperationId) -> Operation {
            self.operations.get(id).unwrap().unwrap()
        }
    }

    fn create_command(name: &str) -> CreateMachineCommand {
        CreateMachineCommand {
            config: MachineConfig::named(name).with_image("ubuntu-22.04").with_memory_mb(2048),
            correlation_id: None,
        }
    }

    #[test]
    fn create_machine_happy_path() {
        let mut h = harness(Options::default());

        let created = h.start(&create_command("web"), &[]);
        let operation = h.operation(created[0].id());

        assert_eq!(operation.status(), OperationStatus::Completed);
        assert_eq!(
            h.dispatched,
            vec![
                "create_machine",
                "validate_machine_config",
                "place_virtual_machine",
                "prepare_virtual_machine_image",
                "update_virtual_machine",
            ]
        );
        assert!(operation.tasks().iter().all(|t| t.state == TaskState::Completed));

        let machine = operation.resources()[0].resource();
        let machine_id = machine.machine_id().unwrap();
        assert_eq!(h.inventory.agent_of(machine_id).as_deref(), Some("hv-01"));
        assert_eq!(
            operation.result(),
            Some(&serde_json::json!({ "machine_id": machine_id }))
        );

        let sagas = h.controller.engine().sagas().for_operation(operation.id());
        assert_eq!(sagas.len(), 2);
        assert!(sagas.iter().all(|s| s.status == SagaStatus::Completed));
    }

    #[test]
    fn validation_failure_fails_operation_without_placement() {
        let mut h = harness(Options::default());

        let created = h.start(&create_command("not a valid name!"), &[]);
        let operation = h.operation(created[0].id());

        assert_eq!(operation.status(), OperationStatus::Failed);
        assert!(!h.dispatched.iter().any(|c| c == "place_virtual_machine"));
        let error = ErrorData::from_json(operation.result().unwrap()).unwrap();
        assert!(error.message.contains("name"));
        assert!(error.details.is_some());
    }

    #[test]
    fn agent_failure_reaches_operation_with_original_payload() {
        let mut h = harness(Options {
            failing: vec!["prepare_virtual_machine_image"],
            ..Options::default()
        });

        let created = h.start(&create_command("web"), &[]);
        let operation = h.operation(created[0].id());

        assert_eq!(operation.status(), OperationStatus::Failed);
        assert_eq!(
            ErrorData::from_json(operation.result().unwrap()).unwrap().message,
            "prepare_virtual_machine_image failed on hv-01"
        );
        assert!(!h.dispatched.iter().any(|c| c == "update_virtual_machine"));
    }

    #[test]
    fn placement_rejection_exhausts_candidates_and_fails() {
        let mut h = harness(Options {
            confirm_placement: false,
            ..Options::default()
        });

        let created = h.start(&create_command("web"), &[]);

        let requests: Vec<VerifyPlacementCalculationCommand> = h
            .agents
            .iter()
            .flat_map(|agent| agent.placement_requests.borrow().clone())
            .collect();
        assert_eq!(
            requests.iter().map(|r| r.agent_name.as_str()).collect::<Vec<_>>(),
            vec!["hv-01", "hv-02"]
        );
        assert_ne!(requests[0].correlation_id, requests[1].correlation_id);

        let operation = h.operation(created[0].id());
        assert_eq!(operation.status(), OperationStatus::Failed);
        assert!(
            ErrorData::from_json(operation.result().unwrap())
                .unwrap()
                .message
                .contains("no agent has capacity")
        );
        assert!(!h.dispatched.iter().any(|c| c == "prepare_virtual_machine_image"));
    }

    #[test]
    fn placement_bound_stops_retrying() {
        let mut h = harness(Options {
            confirm_placement: false,
            max_placement_attempts: 1,
            ..Options::default()
        });

        let created = h.start(&create_command("web"), &[]);

        assert!(h.agents[1].placement_requests.borrow().is_empty());
        let operation = h.operation(created[0].id());
        assert_eq!(operation.status(), OperationStatus::Failed);
        assert!(
            ErrorData::from_json(operation.result().unwrap())
                .unwrap()
                .message
                .contains("not confirmed after 1 attempts")
        );
    }

    #[test]
    fn destroy_fans_out_one_task_per_machine() {
        let mut h = harness(Options::default());
        let a = MachineId::new();
        let b = MachineId::new();
        h.inventory.record(a, "hv-01");
        h.inventory.record(b, "hv-02");
        let resources = [Resource::machine(a), Resource::machine(b)];

        let created = h.start(
            &DestroyResourcesCommand {
                resources: Vec::new(),
                correlation_id: None,
            },
            &resources,
        );

        assert_eq!(created.len(), 1);
        let operation = h.operation(created[0].id());
        assert_eq!(operation.status(), OperationStatus::Completed);
        assert_eq!(h.dispatched.iter().filter(|c| *c == "destroy_machine").count(), 2);
        assert_eq!(h.dispatched.iter().filter(|c| *c == "remove_vm").count(), 2);
        assert_eq!(h.dispatched.last().map(String::as_str), Some("release_resources"));

        let response: DestroyResourcesResponse =
            serde_json::from_value(operation.result().unwrap().clone()).unwrap();
        assert_eq!(response.destroyed_resources.len(), 2);
        assert!(response.destroyed_resources.contains(&resources[0]));
        assert!(response.destroyed_resources.contains(&resources[1]));

        // Sub-tasks re-attached the same machines; rows stay unique.
        assert_eq!(operation.resources().len(), 2);
        assert!(h.inventory.is_empty());
    }

    #[test]
    fn correlated_start_is_idempotent() {
        let mut h = harness(Options::default());
        let command = CreateMachineCommand {
            correlation_id: Some(uuid::Uuid::now_v7()),
            ..create_command("web")
        };

        let first = h.start(&command, &[]);
        let second = h.start(&command, &[]);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(h.operations.len(), 1);
        assert_eq!(h.dispatched.iter().filter(|c| *c == "create_machine").count(), 1);
    }

    #[test]
    fn redelivery_after_completion_changes_nothing() {
        let mut h = harness(Options::default());
        let created = h.start(&create_command("web"), &[]);
        let operation = h.operation(created[0].id());
        let root = operation.root_task().unwrap().clone();

        let sagas_before = h.controller.engine().sagas().for_operation(operation.id());
        let late = OperationTaskStatusEvent {
            operation_id: operation.id(),
            task_id: operation.tasks()[1].id,
            parent_task_id: Some(root.id),
            command_type: "validate_machine_config".to_string(),
            operation_failed: true,
            payload: Some(ErrorData::new("late").into_json()),
        };
        h.bus
            .send(&h.config.controller_address(), Message::TaskStatus(late).into())
            .unwrap();
        h.bus
            .send(
                &h.config.controller_address(),
                Message::TaskAccepted(OperationTaskAcceptedEvent {
                    agent_name: "controller".to_string(),
                    operation_id: operation.id(),
                    task_id: root.id,
                    parent_task_id: None,
                    command: CommandEnvelope::wrap(&create_command("web")).unwrap(),
                })
                .into(),
            )
            .unwrap();
        let dispatched_before = h.dispatched.len();
        h.settle();

        let after = h.operation(operation.id());
        assert_eq!(after.status(), OperationStatus::Completed);
        assert_eq!(after.result(), operation.result());
        assert_eq!(after.tasks(), operation.tasks());
        assert_eq!(h.dispatched.len(), dispatched_before);
        assert_eq!(h.controller.engine().sagas().for_operation(operation.id()), sagas_before);
    }

    #[test]
    fn unknown_command_type_fails_operation() {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        struct Reticulate;

        impl TaskCommand for Reticulate {
            const COMMAND_TYPE: &'static str = "reticulate_splines";
        }

        let mut h = harness(Options::default());
        let created = h.start(&Reticulate, &[]);

        let operation = h.operation(created[0].id());
        assert_eq!(operation.status(), OperationStatus::Failed);
        assert!(
            ErrorData::from_json(operation.result().unwrap())
                .unwrap()
                .message
                .contains("reticulate_splines")
        );
    }
}
