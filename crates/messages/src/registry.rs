//! Command registry: stable type tag → decoder + route.
//!
//! The transport only carries a tag and JSON. The registry is the lookup table
//! that turns a tag back into a typed command, which both validates the payload
//! and tells the controller where the task runs.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::command::{AgentCommand, CommandEnvelope, TaskCommand};

/// Where a task executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRoute {
    /// Runs inside the controller (a workflow saga or a local handler).
    Controller,
    /// Runs on the named agent.
    Agent(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown command type '{0}'")]
    UnknownCommandType(String),

    #[error("malformed '{command_type}' payload: {source}")]
    Malformed {
        command_type: String,
        #[source]
        source: serde_json::Error,
    },
}

type RouteFn = fn(&JsonValue) -> Result<CommandRoute, serde_json::Error>;

#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    routes: HashMap<&'static str, RouteFn>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handled by the controller itself.
    pub fn register_controller<C: TaskCommand>(&mut self) -> &mut Self {
        self.routes.insert(C::COMMAND_TYPE, route_to_controller::<C>);
        self
    }

    /// Register a command executed by the agent it names.
    pub fn register_agent<C: AgentCommand>(&mut self) -> &mut Self {
        self.routes.insert(C::COMMAND_TYPE, route_to_agent::<C>);
        self
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.routes.contains_key(command_type)
    }

    /// Decode the payload and decide where the task runs.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<CommandRoute, RegistryError> {
        let route = self
            .routes
            .get(envelope.command_type.as_str())
            .ok_or_else(|| RegistryError::UnknownCommandType(envelope.command_type.clone()))?;

        route(&envelope.command_json).map_err(|source| RegistryError::Malformed {
            command_type: envelope.command_type.clone(),
            source,
        })
    }
}

fn route_to_controller<C: TaskCommand>(json: &JsonValue) -> Result<CommandRoute, serde_json::Error> {
    C::deserialize(json)?;
    Ok(CommandRoute::Controller)
}

fn route_to_agent<C: AgentCommand>(json: &JsonValue) -> Result<CommandRoute, serde_json::Error> {
    let command = C::deserialize(json)?;
    Ok(CommandRoute::Agent(command.agent_name().to_string()))
}
