//! Saga instance storage with optimistic concurrency.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemorySagaStore;
pub use r#trait::{SagaRecord, SagaStore, SagaStoreError};
