//! Deterministic placement scoring over agent capacity.
//!
//! Selection rules:
//! - only online agents that are not excluded
//! - enough free memory and logical cores for the machine
//! - most free memory wins; ties are broken by agent name

use serde::{Deserialize, Serialize};

use crate::config::MachineConfig;

/// Capacity snapshot of one agent (Hyper-V host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapacity {
    pub name: String,
    pub online: bool,
    pub free_memory_mb: u64,
    pub logical_cpus: u32,
}

impl AgentCapacity {
    pub fn new(name: impl Into<String>, free_memory_mb: u64, logical_cpus: u32) -> Self {
        Self {
            name: name.into(),
            online: true,
            free_memory_mb,
            logical_cpus,
        }
    }

    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    pub fn fits(&self, config: &MachineConfig) -> bool {
        self.online
            && self.free_memory_mb >= config.required_memory_mb()
            && self.logical_cpus >= config.required_cpus()
    }
}

/// Pick the best agent for `config`, skipping `excluded` agent names.
pub fn select_agent<'a>(
    agents: &'a [AgentCapacity],
    config: &MachineConfig,
    excluded: &[String],
) -> Option<&'a AgentCapacity> {
    agents
        .iter()
        .filter(|a| a.fits(config) && !excluded.iter().any(|e| e == &a.name))
        .min_by(|a, b| {
            b.free_memory_mb
                .cmp(&a.free_memory_mb)
                .then_with(|| a.name.cmp(&b.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(memory_mb: u64) -> MachineConfig {
        MachineConfig::named("vm").with_memory_mb(memory_mb)
    }

    #[test]
    fn prefers_most_free_memory() {
        let agents = vec![
            AgentCapacity::new("host-a", 4096, 8),
            AgentCapacity::new("host-b", 16384, 8),
            AgentCapacity::new("host-c", 8192, 8),
        ];
        let chosen = select_agent(&agents, &config(2048), &[]).unwrap();
        assert_eq!(chosen.name, "host-b");
    }

    #[test]
    fn skips_offline_excluded_and_too_small() {
        let agents = vec![
            AgentCapacity::new("big", 65536, 32).offline(),
            AgentCapacity::new("rejected", 32768, 32),
            AgentCapacity::new("tiny", 512, 32),
            AgentCapacity::new("ok", 4096, 2),
        ];
        let chosen = select_agent(&agents, &config(2048), &["rejected".to_string()]).unwrap();
        assert_eq!(chosen.name, "ok");
    }

    #[test]
    fn respects_core_count() {
        let agents = vec![AgentCapacity::new("two-cores", 65536, 2)];
        let wants_four = config(1024).with_cpu_count(4);
        assert!(select_agent(&agents, &wants_four, &[]).is_none());
    }

    #[test]
    fn ties_break_by_name() {
        let agents = vec![
            AgentCapacity::new("host-z", 8192, 4),
            AgentCapacity::new("host-a", 8192, 4),
        ];
        assert_eq!(select_agent(&agents, &config(1024), &[]).unwrap().name, "host-a");
    }

    proptest! {
        /// Property: the chosen agent fits and no fitting agent has more free memory.
        #[test]
        fn chosen_agent_is_a_best_fit(
            memories in proptest::collection::vec(0u64..65536, 1..12),
            required in 32u64..32768,
        ) {
            let agents: Vec<AgentCapacity> = memories
                .iter()
                .enumerate()
                .map(|(i, m)| AgentCapacity::new(format!("host-{i:02}"), *m, 4))
                .collect();
            let config = config(required);

            match select_agent(&agents, &config, &[]) {
                Some(chosen) => {
                    prop_assert!(chosen.fits(&config));
                    prop_assert!(agents
                        .iter()
                        .filter(|a| a.fits(&config))
                        .all(|a| a.free_memory_mb <= chosen.free_memory_mb));
                }
                None => prop_assert!(agents.iter().all(|a| !a.fits(&config))),
            }
        }
    }
}
