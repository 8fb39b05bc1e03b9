//! Machine inventory boundary: which agent hosts which machine.

use std::collections::HashMap;
use std::sync::RwLock;

use vmflow_core::MachineId;

pub trait MachineInventory: Send + Sync {
    fn agent_of(&self, machine_id: MachineId) -> Option<String>;

    /// Record (or move) a machine to an agent. Idempotent.
    fn record(&self, machine_id: MachineId, agent_name: &str);

    /// Forget a machine; returns whether it was known.
    fn remove(&self, machine_id: MachineId) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryMachineInventory {
    machines: RwLock<HashMap<MachineId, String>>,
}

impl InMemoryMachineInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.machines.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MachineInventory for InMemoryMachineInventory {
    fn agent_of(&self, machine_id: MachineId) -> Option<String> {
        self.machines.read().ok()?.get(&machine_id).cloned()
    }

    fn record(&self, machine_id: MachineId, agent_name: &str) {
        if let Ok(mut machines) = self.machines.write() {
            machines.insert(machine_id, agent_name.to_string());
        }
    }

    fn remove(&self, machine_id: MachineId) -> bool {
        self.machines
            .write()
            .map(|mut m| m.remove(&machine_id).is_some())
            .unwrap_or(false)
    }
}
