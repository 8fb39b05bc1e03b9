use serde::Serialize;

use crate::command::TaskCommand;
use crate::task::ErrorData;

/// Runs a command to completion in-process (no saga, no round-trips).
///
/// The output becomes the success payload of the task's status event; an
/// `ErrorData` becomes the failure payload.
pub trait CommandHandler: Send + Sync + 'static {
    type Cmd: TaskCommand;
    type Output: Serialize;

    fn handle(&self, command: Self::Cmd) -> Result<Self::Output, ErrorData>;
}
