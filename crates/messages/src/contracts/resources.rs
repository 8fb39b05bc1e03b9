use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vmflow_core::Resource;

use crate::command::TaskCommand;

/// Destroy a heterogeneous set of resources under one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyResourcesCommand {
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl TaskCommand for DestroyResourcesCommand {
    const COMMAND_TYPE: &'static str = "destroy_resources";
    const RESOURCE_COLLECTION: bool = true;

    fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    fn with_resources(&self, resources: &[Resource]) -> Self {
        Self {
            resources: resources.to_vec(),
            correlation_id: self.correlation_id,
        }
    }
}

/// Outcome of a destroy workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DestroyResourcesResponse {
    #[serde(default)]
    pub destroyed_resources: Vec<Resource>,
    #[serde(default)]
    pub detached_resources: Vec<Resource>,
}

impl DestroyResourcesResponse {
    pub fn merge(&mut self, other: DestroyResourcesResponse) {
        for resource in other.destroyed_resources {
            if !self.destroyed_resources.contains(&resource) {
                self.destroyed_resources.push(resource);
            }
        }
        for resource in other.detached_resources {
            if !self.detached_resources.contains(&resource) {
                self.detached_resources.push(resource);
            }
        }
    }
}

/// Forget destroyed resources in the controller's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseResourcesCommand {
    pub resources: Vec<Resource>,
}

impl TaskCommand for ReleaseResourcesCommand {
    const COMMAND_TYPE: &'static str = "release_resources";
}
