//! Infrastructure layer: stores, dispatchers, saga engine, controller.

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod handlers;
pub mod inventory;
pub mod operation_store;
pub mod placement;
pub mod saga;
pub mod saga_store;
pub mod workers;

mod integration_tests;
