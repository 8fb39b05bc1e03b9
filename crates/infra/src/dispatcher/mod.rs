//! Operation and task dispatch.
//!
//! Both dispatchers follow the same pipeline:
//!
//! ```text
//! command
//!   ↓
//! 1. Resolve operation id(s) (correlation id / fan-out)
//!   ↓
//! 2. Persist Operation rows, resources and task rows (one transaction per call)
//!   ↓
//! 3. Send the task message to the controller queue (after commit)
//! ```
//!
//! A failed send after 2 is returned as `Publish`. Sub-tasks started by a saga
//! are sent again from the saga's outbox on its next message; for a top-level
//! operation the error goes back to the producer.

pub mod operation;
pub mod task;

pub use operation::OperationDispatcher;
pub use task::OperationTaskDispatcher;

use thiserror::Error;

use vmflow_core::OperationId;
use vmflow_messages::CommandDecodeError;

use crate::operation_store::OperationStoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The operation a sub-task was started for does not exist.
    #[error("operation {0} not found")]
    OperationNotFound(OperationId),

    #[error(transparent)]
    Store(OperationStoreError),

    #[error(transparent)]
    Command(#[from] CommandDecodeError),

    /// Sending failed after a successful commit (at-least-once; retry may duplicate).
    #[error("message could not be sent after commit: {0}")]
    Publish(String),
}

impl From<OperationStoreError> for DispatchError {
    fn from(value: OperationStoreError) -> Self {
        match value {
            OperationStoreError::NotFound(id) => DispatchError::OperationNotFound(id),
            other => DispatchError::Store(other),
        }
    }
}
