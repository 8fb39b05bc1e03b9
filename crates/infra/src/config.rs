//! Orchestrator configuration loading and representation.
//!
//! Defaults cover a single-process setup; every value can be overridden
//! through `VMFLOW_*` environment variables.

use thiserror::Error;

use vmflow_messages::Address;

pub const ENV_CONTROLLER_NAME: &str = "VMFLOW_CONTROLLER_NAME";
pub const ENV_CONTROLLER_QUEUE: &str = "VMFLOW_CONTROLLER_QUEUE";
pub const ENV_AGENT_QUEUE_PREFIX: &str = "VMFLOW_AGENT_QUEUE_PREFIX";
pub const ENV_MAX_PLACEMENT_ATTEMPTS: &str = "VMFLOW_MAX_PLACEMENT_ATTEMPTS";
pub const ENV_MAX_SAVE_ATTEMPTS: &str = "VMFLOW_MAX_SAVE_ATTEMPTS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Agent name recorded when the controller accepts a task itself.
    pub controller_name: String,
    pub controller_queue: String,
    /// Agents listen on `{agent_queue_prefix}.{agent_name}`.
    pub agent_queue_prefix: String,
    /// Placement candidates tried before a placement saga gives up.
    pub max_placement_attempts: u32,
    /// Saves attempted per message when the saga revision keeps moving.
    pub max_save_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            controller_name: "controller".to_string(),
            controller_queue: "vmflow.controller".to_string(),
            agent_queue_prefix: "vmflow.agent".to_string(),
            max_placement_attempts: 5,
            max_save_attempts: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (missing keys keep their defaults).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CONTROLLER_NAME) {
            config.controller_name = non_empty(ENV_CONTROLLER_NAME, value)?;
        }
        if let Some(value) = lookup(ENV_CONTROLLER_QUEUE) {
            config.controller_queue = non_empty(ENV_CONTROLLER_QUEUE, value)?;
        }
        if let Some(value) = lookup(ENV_AGENT_QUEUE_PREFIX) {
            config.agent_queue_prefix = non_empty(ENV_AGENT_QUEUE_PREFIX, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_PLACEMENT_ATTEMPTS) {
            config.max_placement_attempts = positive(ENV_MAX_PLACEMENT_ATTEMPTS, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_SAVE_ATTEMPTS) {
            config.max_save_attempts = positive(ENV_MAX_SAVE_ATTEMPTS, value)?;
        }

        Ok(config)
    }

    pub fn controller_address(&self) -> Address {
        Address::queue(self.controller_queue.clone())
    }

    pub fn agent_address(&self, agent_name: &str) -> Address {
        Address::agent(&self.agent_queue_prefix, agent_name)
    }
}

fn non_empty(key: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid { key, value });
    }
    Ok(trimmed.to_string())
}

fn positive(key: &'static str, value: String) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.agent_address("hv-01").as_str(), "vmflow.agent.hv-01");
    }

    #[test]
    fn overrides_are_applied() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            (ENV_AGENT_QUEUE_PREFIX, "cloud.agents"),
            (ENV_MAX_PLACEMENT_ATTEMPTS, " 2 "),
        ]))
        .unwrap();

        assert_eq!(config.agent_address("hv-01").as_str(), "cloud.agents.hv-01");
        assert_eq!(config.max_placement_attempts, 2);
        assert_eq!(config.max_save_attempts, 3);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = OrchestratorConfig::from_lookup(lookup(&[(ENV_MAX_SAVE_ATTEMPTS, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: ENV_MAX_SAVE_ATTEMPTS,
                value: "0".to_string()
            }
        );

        assert!(OrchestratorConfig::from_lookup(lookup(&[(ENV_CONTROLLER_QUEUE, "  ")])).is_err());
        assert!(
            OrchestratorConfig::from_lookup(lookup(&[(ENV_MAX_PLACEMENT_ATTEMPTS, "many")])).is_err()
        );
    }
}
