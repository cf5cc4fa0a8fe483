use crate::core::errors::{LockstepError, Result};
use crate::state::{deep_equals_with, hash_of_with, NumericEquality, StateRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What an instruction channel does when one of its handlers fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HandlerFailurePolicy {
    /// Log the failure, record it in the delivery report and keep going
    #[default]
    LogAndContinue,
    /// Fail the dispatch with an aggregate of every handler failure
    Aggregate,
}

/// Instruction channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacity of the broadcast stream observers subscribe to
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Handler failure policy, applied to every delivery on the channel
    #[serde(default)]
    pub failure_policy: HandlerFailurePolicy,
}

fn default_broadcast_capacity() -> usize {
    64
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
            failure_policy: HandlerFailurePolicy::default(),
        }
    }
}

/// State polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between two reads of the remote state
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Give up after this long
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_timeout_secs() -> u64 {
    600 // 10 minutes
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// State comparison settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonConfig {
    #[serde(default)]
    pub numeric_equality: NumericEquality,
}

impl ComparisonConfig {
    /// [`deep_equals_with`] under the configured numeric policy
    pub fn deep_equals<A, B>(&self, left: &A, right: &B) -> bool
    where
        A: StateRecord + ?Sized,
        B: StateRecord + ?Sized,
    {
        deep_equals_with(left, right, self.numeric_equality)
    }

    pub fn hash_of<S: StateRecord + ?Sized>(&self, state: &S) -> u64 {
        hash_of_with(state, self.numeric_equality)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub ansi: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: false,
        }
    }
}

impl LogConfig {
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        self.level.parse::<tracing::Level>().map_err(|_| {
            LockstepError::configuration_field(
                format!("unrecognized log level '{}'", self.level),
                "log.level",
            )
        })
    }
}

/// Top-level configuration for one participant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockstepConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl LockstepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel.broadcast_capacity == 0 {
            return Err(LockstepError::configuration_field(
                "broadcast_capacity must be greater than 0",
                "channel.broadcast_capacity",
            ));
        }
        if self.polling.interval_ms == 0 {
            return Err(LockstepError::configuration_field(
                "interval_ms must be greater than 0",
                "polling.interval_ms",
            ));
        }
        if self.polling.timeout_secs == 0 {
            return Err(LockstepError::configuration_field(
                "timeout_secs must be greater than 0",
                "polling.timeout_secs",
            ));
        }
        if self.polling.interval() > self.polling.timeout() {
            return Err(LockstepError::configuration_field(
                "interval_ms cannot exceed the polling timeout",
                "polling.interval_ms",
            ));
        }
        self.log.tracing_level()?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LockstepConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LockstepConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LockstepError::io(format!("read config {}", path.display()), e))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LockstepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel.failure_policy, HandlerFailurePolicy::LogAndContinue);
        assert_eq!(config.comparison.numeric_equality, NumericEquality::Strict);
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
channel:
  failure_policy: Aggregate
polling:
  interval_ms: 250
comparison:
  numeric_equality: Lenient
log:
  level: debug
"#;
        let config = LockstepConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.channel.failure_policy, HandlerFailurePolicy::Aggregate);
        assert_eq!(config.channel.broadcast_capacity, 64);
        assert_eq!(config.polling.interval(), Duration::from_millis(250));
        assert_eq!(config.polling.timeout_secs, 600);
        assert_eq!(config.comparison.numeric_equality, NumericEquality::Lenient);
        assert_eq!(config.log.tracing_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = LockstepConfig::from_yaml_str("polling:\n  interval_ms: 0\n").unwrap_err();
        assert!(matches!(
            err,
            LockstepError::Configuration { field: Some(ref f), .. } if f == "polling.interval_ms"
        ));

        let err = LockstepConfig::from_json_str(r#"{"log": {"level": "loud"}}"#).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_comparison_follows_configured_policy() {
        use crate::state::State;

        let stored = State::new("TempState").with("Ratio", 2.0);
        let expected = State::new("TempState").with("Ratio", 2);

        let strict = ComparisonConfig::default();
        assert!(!strict.deep_equals(&stored, &expected));

        let lenient = ComparisonConfig {
            numeric_equality: NumericEquality::Lenient,
        };
        assert!(lenient.deep_equals(&stored, &expected));
        assert_eq!(lenient.hash_of(&stored), lenient.hash_of(&expected));
    }
}
