// Core infrastructure: errors, cancellation, configuration, telemetry
pub mod core;

// Data model
pub mod state;        // Property bags and state records
pub mod instructions; // Instructions, deliveries and the dispatch channel
pub mod topology;     // Participants and roles

// Runtime
pub mod execution;    // Parallel/sequential fan-out and the component registry
pub mod sync;         // State convergence polling
pub mod wire;         // Transport envelope and schema-validated codec
pub mod external;     // Dependency stores and expression evaluation boundaries

// Re-exports for convenience
pub use crate::core::cancellation::CancellationSignal;
pub use crate::core::config::{HandlerFailurePolicy, LockstepConfig};
pub use crate::core::errors::{LockstepError, Result, UnitFailure};
pub use crate::core::telemetry::{init_tracing, EventContext, TelemetrySink};
pub use execution::{run_all, ExecutableUnit, ParallelExecutor, SequentialExecutor};
pub use instructions::{
    ClientServerRequest, DeliveryReport, DeliveryStatus, Instruction, InstructionChannel,
    InstructionDelivery, InstructionHandler, InstructionsType,
};
pub use state::{
    deep_equals, hash_of, ClientServerState, ClientServerStatus, GlobalState, PropertyBag,
    PropertyValue, State, StateRecord,
};
pub use topology::{ClientInstance, EnvironmentLayout};
pub use wire::Item;
