use crate::core::errors::Result;
use crate::state::property_bag::{PropertyBag, PropertyValue};
use serde::{Deserialize, Serialize};

pub const GLOBAL_STATE: &str = "GlobalState";
pub const TEMP_STATE: &str = "TempState";
pub const CLIENT_SERVER_STATE: &str = "ClientServerState";

pub(crate) const STATUS: &str = "Status";
pub(crate) const ERROR_MESSAGE: &str = "ErrorMessage";
pub(crate) const ERROR_REASON: &str = "ErrorReason";

/// Anything that is a named snapshot over a property bag.
///
/// Comparison, hashing and the wire codec work through this trait so the
/// specialised records share them without sharing storage.
pub trait StateRecord {
    fn name(&self) -> &str;
    fn properties(&self) -> &PropertyBag;
}

/// A named snapshot of properties exchanged between participants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    name: String,
    #[serde(default)]
    properties: PropertyBag,
}

impl State {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            properties: PropertyBag::new(),
        }
    }

    pub fn from_properties<S: Into<String>>(name: S, properties: PropertyBag) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    pub fn into_properties(self) -> PropertyBag {
        self.properties
    }

    pub fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V) {
        self.properties.set(key, value);
    }

    pub fn with<K: Into<String>, V: Into<PropertyValue>>(mut self, key: K, value: V) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Free-form status text, if any has been recorded
    pub fn status(&self) -> Result<Option<String>> {
        optional(&self.properties, STATUS)
    }

    pub fn set_status<S: Into<String>>(&mut self, status: S) {
        let status: String = status.into();
        self.properties.set(STATUS, status);
    }

    pub fn error_message(&self) -> Result<Option<String>> {
        optional(&self.properties, ERROR_MESSAGE)
    }

    pub fn set_error_message<S: Into<String>>(&mut self, message: S) {
        let message: String = message.into();
        self.properties.set(ERROR_MESSAGE, message);
    }

    pub fn error_reason(&self) -> Result<Option<i64>> {
        optional(&self.properties, ERROR_REASON)
    }

    pub fn set_error_reason(&mut self, reason: i64) {
        self.properties.set(ERROR_REASON, reason);
    }
}

pub(crate) fn optional<T: crate::state::property_bag::FromProperty>(
    bag: &PropertyBag,
    key: &str,
) -> Result<Option<T>> {
    if bag.contains_key(key) {
        bag.get(key).map(Some)
    } else {
        Ok(None)
    }
}

impl StateRecord for State {
    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> &PropertyBag {
        &self.properties
    }
}
