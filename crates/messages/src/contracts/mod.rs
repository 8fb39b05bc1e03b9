//! Message contracts of the machine workflows.

pub mod machine;
pub mod placement;
pub mod resources;

pub use machine::{
    ConvergeVirtualMachineResult, CreateMachineCommand, DestroyMachineCommand,
    PlaceVirtualMachineCommand, PlaceVirtualMachineResult, PrepareVirtualMachineImageCommand,
    RemoveVmCommand, RemoveVmResult, UpdateMachineCommand, UpdateVirtualMachineCommand,
    ValidateMachineConfigCommand, ValidateMachineConfigResult,
};
pub use placement::{PlacementVerificationCompletedEvent, VerifyPlacementCalculationCommand};
pub use resources::{DestroyResourcesCommand, DestroyResourcesResponse, ReleaseResourcesCommand};

use crate::registry::CommandRegistry;

/// Registry with every command the controller knows how to route.
pub fn default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .register_controller::<CreateMachineCommand>()
        .register_controller::<UpdateMachineCommand>()
        .register_controller::<DestroyMachineCommand>()
        .register_controller::<DestroyResourcesCommand>()
        .register_controller::<PlaceVirtualMachineCommand>()
        .register_controller::<ValidateMachineConfigCommand>()
        .register_controller::<ReleaseResourcesCommand>()
        .register_agent::<PrepareVirtualMachineImageCommand>()
        .register_agent::<UpdateVirtualMachineCommand>()
        .register_agent::<RemoveVmCommand>();
    registry
}
