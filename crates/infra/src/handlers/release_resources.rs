use std::sync::Arc;

use tracing::info;

use vmflow_messages::contracts::ReleaseResourcesCommand;
use vmflow_messages::{CommandHandler, ErrorData};

use crate::inventory::MachineInventory;

/// Drops destroyed machines from the machine inventory.
///
/// Releasing a machine the inventory no longer knows is not an error.
pub struct ReleaseResourcesHandler {
    inventory: Arc<dyn MachineInventory>,
}

impl ReleaseResourcesHandler {
    pub fn new(inventory: Arc<dyn MachineInventory>) -> Self {
        Self { inventory }
    }
}

impl CommandHandler for ReleaseResourcesHandler {
    type Cmd = ReleaseResourcesCommand;
    type Output = ();

    fn handle(&self, command: ReleaseResourcesCommand) -> Result<(), ErrorData> {
        let released = command
            .resources
            .iter()
            .filter_map(|r| r.machine_id())
            .filter(|machine_id| self.inventory.remove(*machine_id))
            .count();
        info!(requested = command.resources.len(), released, "resources released");
        Ok(())
    }
}
