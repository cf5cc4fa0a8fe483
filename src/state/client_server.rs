use crate::core::errors::{LockstepError, Result};
use crate::state::property_bag::{match_variant, names_match, FromProperty, PropertyBag, PropertyValue};
use crate::state::state::{State, StateRecord, CLIENT_SERVER_STATE, STATUS};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Where a client/server pair is in its execution protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientServerStatus {
    Undefined,
    Ready,
    ExecutionStarted,
    ExecutionCompleted,
    Failed,
    ResetCompleted,
    ResetInProgress,
}

impl ClientServerStatus {
    const VARIANTS: [(ClientServerStatus, &'static str); 7] = [
        (ClientServerStatus::Undefined, "Undefined"),
        (ClientServerStatus::Ready, "Ready"),
        (ClientServerStatus::ExecutionStarted, "ExecutionStarted"),
        (ClientServerStatus::ExecutionCompleted, "ExecutionCompleted"),
        (ClientServerStatus::Failed, "Failed"),
        (ClientServerStatus::ResetCompleted, "ResetCompleted"),
        (ClientServerStatus::ResetInProgress, "ResetInProgress"),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::VARIANTS[*self as usize].1
    }
}

impl fmt::Display for ClientServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromProperty for ClientServerStatus {
    const EXPECTED: &'static str = "ClientServerStatus";

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match_variant(value, &Self::VARIANTS)
    }
}

impl From<ClientServerStatus> for PropertyValue {
    fn from(status: ClientServerStatus) -> Self {
        PropertyValue::String(status.as_str().to_string())
    }
}

/// State exchanged between a client and its server(s). `Status` is mandatory:
/// a record without a recognised status does not decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClientServerState {
    inner: State,
}

impl ClientServerState {
    pub fn new(status: ClientServerStatus) -> Self {
        let mut inner = State::new(CLIENT_SERVER_STATE);
        inner.set(STATUS, status);
        Self { inner }
    }

    pub fn with_properties(status: ClientServerStatus, properties: PropertyBag) -> Self {
        let mut inner = State::from_properties(CLIENT_SERVER_STATE, properties);
        inner.set(STATUS, status);
        Self { inner }
    }

    /// Validate a generic state as a client/server state
    pub fn from_state(state: State) -> Result<Self> {
        let status = state
            .properties()
            .try_get(STATUS)
            .ok_or_else(|| LockstepError::missing_property(STATUS))?;
        if ClientServerStatus::from_property(status).is_none() {
            return Err(LockstepError::type_conversion(
                STATUS,
                ClientServerStatus::EXPECTED,
                status.to_string(),
            ));
        }
        Ok(Self { inner: state })
    }

    pub fn status(&self) -> ClientServerStatus {
        // Checked at construction and on every write.
        self.inner
            .properties()
            .get(STATUS)
            .unwrap_or(ClientServerStatus::Undefined)
    }

    pub fn set_status(&mut self, status: ClientServerStatus) {
        self.inner.set(STATUS, status);
    }

    pub fn error_message(&self) -> Result<Option<String>> {
        self.inner.error_message()
    }

    pub fn set_error_message<S: Into<String>>(&mut self, message: S) {
        self.inner.set_error_message(message);
    }

    /// Set any property except `Status`, which only changes through
    /// [`ClientServerState::set_status`].
    pub fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V) -> Result<()> {
        let key = key.into();
        if names_match(&key, STATUS) {
            let value: PropertyValue = value.into();
            let status = ClientServerStatus::from_property(&value).ok_or_else(|| {
                LockstepError::type_conversion(STATUS, ClientServerStatus::EXPECTED, value.to_string())
            })?;
            self.set_status(status);
            return Ok(());
        }
        self.inner.set(key, value);
        Ok(())
    }

    pub fn state(&self) -> &State {
        &self.inner
    }

    pub fn into_state(self) -> State {
        self.inner
    }
}

impl TryFrom<State> for ClientServerState {
    type Error = LockstepError;

    fn try_from(state: State) -> Result<Self> {
        Self::from_state(state)
    }
}

impl<'de> Deserialize<'de> for ClientServerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let state = State::deserialize(deserializer)?;
        ClientServerState::from_state(state).map_err(serde::de::Error::custom)
    }
}

impl StateRecord for ClientServerState {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn properties(&self) -> &PropertyBag {
        self.inner.properties()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_by_name_or_ordinal() {
        let by_name = PropertyValue::from("executionstarted");
        let by_ordinal = PropertyValue::from(6);
        let by_text_ordinal = PropertyValue::from("1");

        assert_eq!(
            ClientServerStatus::from_property(&by_name),
            Some(ClientServerStatus::ExecutionStarted)
        );
        assert_eq!(
            ClientServerStatus::from_property(&by_ordinal),
            Some(ClientServerStatus::ResetInProgress)
        );
        assert_eq!(
            ClientServerStatus::from_property(&by_text_ordinal),
            Some(ClientServerStatus::Ready)
        );
        assert_eq!(ClientServerStatus::from_property(&PropertyValue::from(7)), None);
    }

    #[test]
    fn test_missing_status_is_rejected() {
        let json = r#"{"name": "ClientServerState", "properties": {"Other": 1}}"#;
        let err = serde_json::from_str::<ClientServerState>(json).unwrap_err();
        assert!(err.to_string().contains("Status"));

        let json = r#"{"name": "ClientServerState", "properties": {"status": "Sleeping"}}"#;
        assert!(serde_json::from_str::<ClientServerState>(json).is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut state = ClientServerState::new(ClientServerStatus::Ready);
        state.set("RequestId", "abc").unwrap();
        state.set_status(ClientServerStatus::ExecutionCompleted);

        let json = serde_json::to_string(&state).unwrap();
        let back: ClientServerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(), ClientServerStatus::ExecutionCompleted);
        assert_eq!(back, state);
    }

    #[test]
    fn test_status_cannot_be_corrupted() {
        let mut state = ClientServerState::new(ClientServerStatus::Ready);
        assert!(state.set("STATUS", "Bogus").is_err());
        assert_eq!(state.status(), ClientServerStatus::Ready);

        state.set("status", "failed").unwrap();
        assert_eq!(state.status(), ClientServerStatus::Failed);
    }
}
