use serde::{Deserialize, Serialize};

/// Destination of a message on the bus (a named queue).
///
/// Agents listen on `{prefix}.{agent_name}`; the controller listens on its own
/// configured queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn queue(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Queue of a specific agent: `{prefix}.{agent_name}`.
    pub fn agent(prefix: &str, agent_name: &str) -> Self {
        Self(format!("{prefix}.{agent_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
