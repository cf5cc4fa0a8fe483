pub mod channel;
pub mod delivery;
pub mod instruction;

pub use channel::{FnHandler, HandlerId, InstructionChannel, InstructionHandler};
pub use delivery::{DeliveryReport, DeliveryStatus, HandlerFailure, InstructionDelivery};
pub use instruction::{
    ClientServerRequest, ComponentSpec, Instruction, InstructionBuilder, InstructionsType,
    ProfilerInstructions,
};
