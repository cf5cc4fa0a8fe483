//! Structured telemetry context and sinks.
//!
//! Every event carries a correlation (activity) id and a bag of structured
//! context. The instruction channel uses the delivery id as the correlation id,
//! so everything a handler logs for one delivery can be joined back together.

use crate::core::config::LogConfig;
use crate::core::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info_span, Span};
use uuid::Uuid;

/// Correlation id plus structured context for one logical activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub activity_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl EventContext {
    pub fn new<S: Into<String>>(activity_id: S) -> Self {
        Self {
            activity_id: activity_id.into(),
            properties: BTreeMap::new(),
        }
    }

    /// A context with a freshly generated activity id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn add_context<K: Into<String>, V: Serialize>(mut self, key: K, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.properties.insert(key.into(), value);
        self
    }

    /// Span tagged with the activity id; enter it around work for this activity.
    pub fn span(&self, name: &'static str) -> Span {
        info_span!("activity", operation = name, activity_id = %self.activity_id)
    }
}

/// Receives telemetry events. Implementations decide where they go.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &str, context: &EventContext);
}

/// Forwards events to `tracing` at debug level
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &str, context: &EventContext) {
        let properties = serde_json::to_string(&context.properties).unwrap_or_default();
        debug!(event, activity_id = %context.activity_id, %properties, "telemetry");
    }
}

/// Keeps every event in memory
#[derive(Clone, Default)]
pub struct BufferingSink {
    events: Arc<RwLock<Vec<(String, EventContext)>>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, EventContext)> {
        match self.events.read() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.events.write() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl TelemetrySink for BufferingSink {
    fn emit(&self, event: &str, context: &EventContext) {
        let entry = (event.to_string(), context.clone());
        match self.events.write() {
            Ok(mut events) => events.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// Install a fmt subscriber at the configured level. Returns Ok if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let level = config.tracing_level()?;
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let context = EventContext::new("delivery-1")
            .add_context("instructionType", "Profiling")
            .add_context("handlers", 2);

        assert_eq!(context.activity_id, "delivery-1");
        assert_eq!(context.properties["instructionType"], Value::from("Profiling"));
        assert_eq!(context.properties["handlers"], Value::from(2));
    }

    #[test]
    fn test_buffering_sink_collects() {
        let sink = BufferingSink::new();
        sink.emit("Dispatch", &EventContext::new("a"));
        sink.emit("Dispatch", &EventContext::new("b"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].1.activity_id, "b");

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = LogConfig::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
