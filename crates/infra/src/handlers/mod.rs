//! Controller-local command handlers.
//!
//! Commands that need no round-trip to an agent run in-process: the
//! controller accepts the task, runs the handler to completion and reports the
//! outcome as the task's status.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use vmflow_messages::{CommandEnvelope, CommandHandler, ErrorData, TaskCommand};

use crate::inventory::MachineInventory;

pub mod release_resources;
pub mod validate_config;

pub use release_resources::ReleaseResourcesHandler;
pub use validate_config::ValidateMachineConfigHandler;

/// A [`CommandHandler`] with its command and output types erased to JSON.
pub trait LocalHandler: Send + Sync {
    fn command_type(&self) -> &'static str;

    /// Run the command. `Ok` carries the success payload.
    fn handle(&self, command: &CommandEnvelope) -> Result<Option<JsonValue>, ErrorData>;
}

struct TypedHandler<H>(H);

impl<H: CommandHandler> LocalHandler for TypedHandler<H> {
    fn command_type(&self) -> &'static str {
        H::Cmd::COMMAND_TYPE
    }

    fn handle(&self, command: &CommandEnvelope) -> Result<Option<JsonValue>, ErrorData> {
        let command = command
            .decode::<H::Cmd>()
            .map_err(|e| ErrorData::new(e.to_string()))?;
        let output = self.0.handle(command)?;
        let payload = serde_json::to_value(output)
            .map_err(|e| ErrorData::new(format!("result could not be encoded: {e}")))?;
        Ok(match payload {
            JsonValue::Null => None,
            payload => Some(payload),
        })
    }
}

#[derive(Default, Clone)]
pub struct LocalHandlers {
    handlers: HashMap<&'static str, Arc<dyn LocalHandler>>,
}

impl LocalHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: CommandHandler>(&mut self, handler: H) -> &mut Self {
        let handler: Arc<dyn LocalHandler> = Arc::new(TypedHandler(handler));
        self.handlers.insert(handler.command_type(), handler);
        self
    }

    pub fn get(&self, command_type: &str) -> Option<Arc<dyn LocalHandler>> {
        self.handlers.get(command_type).cloned()
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }
}

impl core::fmt::Debug for LocalHandlers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut commands: Vec<_> = self.handlers.keys().collect();
        commands.sort();
        f.debug_struct("LocalHandlers").field("commands", &commands).finish()
    }
}

/// Handlers for every controller-local command.
pub fn default_handlers(inventory: Arc<dyn MachineInventory>) -> LocalHandlers {
    let mut handlers = LocalHandlers::new();
    handlers
        .register(ValidateMachineConfigHandler)
        .register(ReleaseResourcesHandler::new(inventory));
    handlers
}
