//! Operation record store boundary.
//!
//! Holds Operation rows with their task, resource and log collections. The
//! dispatchers create and extend rows; the controller advances them from
//! accepted/status events.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryOperationStore;
pub use r#trait::{OperationStore, OperationStoreError};
