pub mod parallel;
pub mod registry;
pub mod sequential;

pub use parallel::{run_all, ExecutableUnit, ParallelExecutor};
pub use registry::{ComponentMetadata, ComponentRegistry, COMPONENTS, COMPONENT_REGISTRY};
pub use sequential::SequentialExecutor;
