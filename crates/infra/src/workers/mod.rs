//! Background workers.

pub mod message_worker;

pub use message_worker::{MessageWorker, WorkerHandle};
