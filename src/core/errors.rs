use std::fmt;
use thiserror::Error;

/// A single failed unit within a fan-out.
#[derive(Debug)]
pub struct UnitFailure {
    /// Position of the unit in the input order
    pub index: usize,
    /// Name the unit reported for itself
    pub unit: String,
    /// Underlying cause
    pub cause: anyhow::Error,
}

impl UnitFailure {
    pub fn new<S: Into<String>>(index: usize, unit: S, cause: anyhow::Error) -> Self {
        Self {
            index,
            unit: unit.into(),
            cause,
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {:#}", self.index, self.unit, self.cause)
    }
}

fn describe_failures(failures: &[UnitFailure]) -> String {
    let listed = failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} unit(s) failed: {}", failures.len(), listed)
}

/// Unified error type for the lockstep crate
#[derive(Debug, Error)]
pub enum LockstepError {
    /// A property bag read found no value for the key
    #[error("Missing property: '{key}'")]
    MissingProperty { key: String },

    /// A stored property value could not be converted to the requested type
    #[error("Property '{key}' cannot be converted to {expected} (stored value: {actual})")]
    TypeConversion {
        key: String,
        expected: &'static str,
        actual: String,
    },

    /// Instruction type is missing or not one of the protocol values
    #[error("Invalid instruction type: '{value}'")]
    InvalidInstructionType { value: String },

    /// Topology could not be constructed from the supplied participants
    #[error("Invalid topology: {message}")]
    InvalidTopology { message: String },

    /// Topology lookup by name found nothing
    #[error("Unknown participant: '{name}' is not defined in the environment layout")]
    UnknownParticipant { name: String },

    /// Topology lookup by role found nothing
    #[error("No participants with role '{role}' are defined in the environment layout")]
    UnknownRole { role: String },

    /// One or more units of a fan-out failed
    #[error("{operation}: {}", describe_failures(.failures))]
    AggregateExecution {
        operation: String,
        failures: Vec<UnitFailure>,
    },

    /// A delivery's cancellation signal fired before the handler could act on it
    #[error("Delivery '{delivery_id}' was cancelled")]
    DeliveryCancelled { delivery_id: String },

    /// An operation observed its cancellation signal
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// An operation did not finish in its allotted time
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Payload could not be serialized or deserialized
    #[error("Serialization failed ({format}): {source}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Payload did not match the expected wire schema
    #[error("Schema validation failed for {payload}: {message}")]
    SchemaValidation { payload: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockstepError {
    pub fn missing_property<S: Into<String>>(key: S) -> Self {
        Self::MissingProperty { key: key.into() }
    }

    pub fn type_conversion<S: Into<String>, A: Into<String>>(
        key: S,
        expected: &'static str,
        actual: A,
    ) -> Self {
        Self::TypeConversion {
            key: key.into(),
            expected,
            actual: actual.into(),
        }
    }

    pub fn invalid_instruction_type<S: Into<String>>(value: S) -> Self {
        Self::InvalidInstructionType {
            value: value.into(),
        }
    }

    pub fn invalid_topology<S: Into<String>>(message: S) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    pub fn unknown_participant<S: Into<String>>(name: S) -> Self {
        Self::UnknownParticipant { name: name.into() }
    }

    pub fn unknown_role<S: Into<String>>(role: S) -> Self {
        Self::UnknownRole { role: role.into() }
    }

    pub fn aggregate<S: Into<String>>(operation: S, failures: Vec<UnitFailure>) -> Self {
        Self::AggregateExecution {
            operation: operation.into(),
            failures,
        }
    }

    pub fn delivery_cancelled<S: Into<String>>(delivery_id: S) -> Self {
        Self::DeliveryCancelled {
            delivery_id: delivery_id.into(),
        }
    }

    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn serialization<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        format: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn schema_validation<P: Into<String>, M: Into<String>>(payload: P, message: M) -> Self {
        Self::SchemaValidation {
            payload: payload.into(),
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Failures collected by an aggregate error, empty for every other kind
    pub fn failures(&self) -> &[UnitFailure] {
        match self {
            Self::AggregateExecution { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Check if a retry of the same call could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Io { .. } => true,
            // Some unit may succeed on a second run; units own their retries.
            Self::AggregateExecution { .. } => true,
            Self::MissingProperty { .. }
            | Self::TypeConversion { .. }
            | Self::InvalidInstructionType { .. }
            | Self::InvalidTopology { .. }
            | Self::UnknownParticipant { .. }
            | Self::UnknownRole { .. }
            | Self::SchemaValidation { .. }
            | Self::Configuration { .. } => false,
            Self::DeliveryCancelled { .. } | Self::Cancelled { .. } => false,
            Self::Serialization { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingProperty { .. } | Self::TypeConversion { .. } => "property",
            Self::InvalidInstructionType { .. } => "instruction",
            Self::InvalidTopology { .. }
            | Self::UnknownParticipant { .. }
            | Self::UnknownRole { .. } => "topology",
            Self::AggregateExecution { .. } => "execution",
            Self::DeliveryCancelled { .. } | Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::Serialization { .. } | Self::SchemaValidation { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Io { .. } => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LockstepError>;

impl From<std::io::Error> for LockstepError {
    fn from(err: std::io::Error) -> Self {
        Self::io("io_operation", err)
    }
}

impl From<serde_json::Error> for LockstepError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for LockstepError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}
