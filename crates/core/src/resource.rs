//! Resources an operation can touch.
//!
//! A resource is referenced by id only; the entity itself belongs to another
//! subsystem and is never mutated by the orchestration core.

use serde::{Deserialize, Serialize};

use crate::id::{MachineId, ResourceId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Machine,
    VirtualDisk,
    VirtualNetwork,
}

impl core::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ResourceType::Machine => "machine",
            ResourceType::VirtualDisk => "virtual_disk",
            ResourceType::VirtualNetwork => "virtual_network",
        };
        f.write_str(name)
    }
}

/// Reference to a resource (id + type).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub resource_type: ResourceType,
}

impl Resource {
    pub fn new(id: ResourceId, resource_type: ResourceType) -> Self {
        Self { id, resource_type }
    }

    pub fn machine(machine_id: MachineId) -> Self {
        Self::new(machine_id.into(), ResourceType::Machine)
    }

    /// Machine id, if this resource is a machine.
    pub fn machine_id(&self) -> Option<MachineId> {
        match self.resource_type {
            ResourceType::Machine => Some(MachineId::from_uuid(*self.id.as_uuid())),
            _ => None,
        }
    }
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}
