//! Placement calculator boundary.

use std::sync::RwLock;

use vmflow_machines::{AgentCapacity, MachineConfig, select_agent};

/// Picks a candidate agent for a machine.
///
/// Deterministic for a given capacity snapshot; `excluded` lists agents that
/// already rejected this placement.
pub trait PlacementCalculator: Send + Sync {
    fn calculate(&self, config: &MachineConfig, excluded: &[String]) -> Option<String>;
}

/// Capacity-based calculator over an in-memory agent list.
#[derive(Debug, Default)]
pub struct InMemoryPlacementCalculator {
    agents: RwLock<Vec<AgentCapacity>>,
}

impl InMemoryPlacementCalculator {
    pub fn new(agents: Vec<AgentCapacity>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    /// Insert or replace the capacity snapshot of one agent.
    pub fn upsert(&self, capacity: AgentCapacity) {
        if let Ok(mut agents) = self.agents.write() {
            match agents.iter_mut().find(|a| a.name == capacity.name) {
                Some(existing) => *existing = capacity,
                None => agents.push(capacity),
            }
        }
    }
}

impl PlacementCalculator for InMemoryPlacementCalculator {
    fn calculate(&self, config: &MachineConfig, excluded: &[String]) -> Option<String> {
        let agents = self.agents.read().ok()?;
        select_agent(&agents, config, excluded).map(|a| a.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_snapshot() {
        let calculator = InMemoryPlacementCalculator::new(vec![
            AgentCapacity::new("hv-01", 8192, 8),
            AgentCapacity::new("hv-02", 4096, 8),
        ]);
        let config = MachineConfig::named("web").with_memory_mb(2048);
        assert_eq!(calculator.calculate(&config, &[]).as_deref(), Some("hv-01"));

        calculator.upsert(AgentCapacity::new("hv-01", 8192, 8).offline());
        assert_eq!(calculator.calculate(&config, &[]).as_deref(), Some("hv-02"));
        assert_eq!(calculator.calculate(&config, &["hv-02".to_string()]), None);
    }
}
