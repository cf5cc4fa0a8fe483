use crate::core::cancellation::CancellationSignal;
use crate::core::errors::{LockstepError, Result};
use crate::instructions::instruction::Instruction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One instruction in flight: a correlation id, the payload and the signal that
/// bounds its lifetime. The id never changes after construction.
#[derive(Debug, Clone)]
pub struct InstructionDelivery {
    id: String,
    instruction: Arc<Instruction>,
    signal: CancellationSignal,
    created_at: DateTime<Utc>,
}

impl InstructionDelivery {
    pub fn new(instruction: Instruction, signal: CancellationSignal) -> Self {
        Self::with_id(None::<String>, instruction, signal)
    }

    /// Use the caller's id when it is present and non-blank, otherwise
    /// generate one.
    pub fn with_id<S: Into<String>>(
        id: Option<S>,
        instruction: Instruction,
        signal: CancellationSignal,
    ) -> Self {
        let id = id
            .map(Into::into)
            .filter(|id: &String| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            instruction: Arc::new(instruction),
            signal,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Handlers call this between steps to stop once the delivery is cancelled.
    pub fn ensure_active(&self) -> Result<()> {
        if self.signal.is_cancelled() {
            return Err(LockstepError::delivery_cancelled(&self.id));
        }
        Ok(())
    }
}

/// Lifecycle of a delivery inside a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Created,
    Dispatched,
    Completed,
    Cancelled,
}

/// A handler that failed while processing a delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
}

/// Outcome of dispatching one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub handlers_invoked: usize,
    pub handler_failures: Vec<HandlerFailure>,
}

impl DeliveryReport {
    pub fn succeeded(&self) -> bool {
        self.status == DeliveryStatus::Completed && self.handler_failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instruction::InstructionsType;
    use crate::state::PropertyBag;

    fn exit() -> Instruction {
        Instruction::new(InstructionsType::ClientServerExit, PropertyBag::new()).unwrap()
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = InstructionDelivery::new(exit(), CancellationSignal::new());
        let b = InstructionDelivery::new(exit(), CancellationSignal::new());
        assert!(!a.id().is_empty());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_caller_id_is_honoured_unless_blank() {
        let given = InstructionDelivery::with_id(Some("req-42"), exit(), CancellationSignal::new());
        assert_eq!(given.id(), "req-42");

        let blank = InstructionDelivery::with_id(Some("   "), exit(), CancellationSignal::new());
        assert!(Uuid::parse_str(blank.id()).is_ok());
    }

    #[test]
    fn test_ensure_active() {
        let signal = CancellationSignal::new();
        let delivery = InstructionDelivery::with_id(Some("d1"), exit(), signal.clone());
        assert!(delivery.ensure_active().is_ok());

        signal.cancel();
        let err = delivery.ensure_active().unwrap_err();
        assert!(matches!(err, LockstepError::DeliveryCancelled { ref delivery_id } if delivery_id == "d1"));
    }
}
