use tracing::debug;

use vmflow_messages::contracts::{ValidateMachineConfigCommand, ValidateMachineConfigResult};
use vmflow_messages::{CommandHandler, ErrorData};

/// Normalizes a machine configuration and rejects invalid ones.
///
/// The failure payload lists every issue found, not just the first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidateMachineConfigHandler;

impl CommandHandler for ValidateMachineConfigHandler {
    type Cmd = ValidateMachineConfigCommand;
    type Output = ValidateMachineConfigResult;

    fn handle(&self, command: ValidateMachineConfigCommand) -> Result<ValidateMachineConfigResult, ErrorData> {
        match command.config.validate() {
            Ok(config) => Ok(ValidateMachineConfigResult { config }),
            Err(err) => {
                debug!(name = %command.config.name, issues = err.issues.len(), "machine config rejected");
                let details = serde_json::json!({
                    "machine_id": command.machine_id,
                    "issues": err.issues,
                });
                Err(ErrorData::new(err.to_string()).with_details(details))
            }
        }
    }
}
