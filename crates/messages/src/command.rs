use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use vmflow_core::Resource;

/// A command that can run as a task under an operation.
///
/// Commands cross process boundaries as a stable string tag
/// (`COMMAND_TYPE`) plus a JSON payload; receivers decode them through a
/// [`CommandRegistry`](crate::CommandRegistry) instead of a shared type system.
///
/// Commands must be:
/// - **Cloneable**: the operation dispatcher hands each operation a private copy
/// - **Send + Sync + 'static**: they are stored and moved across threads
pub trait TaskCommand:
    Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable type tag (e.g. "create_machine").
    const COMMAND_TYPE: &'static str;

    /// Whether one command instance can act on many resources at once.
    ///
    /// When `false`, starting the command for N resources creates N operations.
    const RESOURCE_COLLECTION: bool = false;

    /// Caller-supplied correlation id; reused as the operation id.
    fn correlation_id(&self) -> Option<Uuid> {
        None
    }

    /// Copy of this command targeting a single resource.
    fn with_resource(&self, _resource: &Resource) -> Self {
        self.clone()
    }

    /// Copy of this command targeting a set of resources.
    fn with_resources(&self, _resources: &[Resource]) -> Self {
        self.clone()
    }
}

/// A command executed by a specific agent (Hyper-V host).
pub trait AgentCommand: TaskCommand {
    fn agent_name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("expected command type '{expected}', found '{found}'")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("command payload could not be encoded/decoded: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type tag + serialized payload of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_type: String,
    pub command_json: JsonValue,
}

impl CommandEnvelope {
    pub fn wrap<C: TaskCommand>(command: &C) -> Result<Self, CommandDecodeError> {
        Ok(Self {
            command_type: C::COMMAND_TYPE.to_string(),
            command_json: serde_json::to_value(command)?,
        })
    }

    pub fn is<C: TaskCommand>(&self) -> bool {
        self.command_type == C::COMMAND_TYPE
    }

    pub fn decode<C: TaskCommand>(&self) -> Result<C, CommandDecodeError> {
        if !self.is::<C>() {
            return Err(CommandDecodeError::TypeMismatch {
                expected: C::COMMAND_TYPE,
                found: self.command_type.clone(),
            });
        }
        Ok(C::deserialize(&self.command_json)?)
    }
}
