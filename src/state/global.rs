use crate::core::errors::Result;
use crate::state::property_bag::{PropertyBag, PropertyValue};
use crate::state::state::{State, StateRecord, GLOBAL_STATE};
use serde::{Deserialize, Serialize};

const IS_FIRST_RUN: &str = "IsFirstRun";
const PROFILE_ITERATION: &str = "ProfileIteration";

/// Run-wide progress shared by every participant. A fresh record is a first
/// run at iteration 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalState {
    inner: State,
}

impl GlobalState {
    pub fn new() -> Self {
        let mut inner = State::new(GLOBAL_STATE);
        inner.set(IS_FIRST_RUN, true);
        inner.set(PROFILE_ITERATION, 1);
        Self { inner }
    }

    pub fn from_state(state: State) -> Self {
        Self { inner: state }
    }

    pub fn is_first_run(&self) -> Result<bool> {
        self.inner.properties().get_or(IS_FIRST_RUN, true)
    }

    pub fn set_first_run(&mut self, first_run: bool) {
        self.inner.set(IS_FIRST_RUN, first_run);
    }

    pub fn profile_iteration(&self) -> Result<i64> {
        self.inner.properties().get_or(PROFILE_ITERATION, 1)
    }

    pub fn set_profile_iteration(&mut self, iteration: i64) {
        self.inner.set(PROFILE_ITERATION, iteration);
    }

    pub fn set<K: Into<String>, V: Into<PropertyValue>>(&mut self, key: K, value: V) {
        self.inner.set(key, value);
    }

    pub fn state(&self) -> &State {
        &self.inner
    }

    pub fn into_state(self) -> State {
        self.inner
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRecord for GlobalState {
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
    fn test_fresh_defaults() {
        let global = GlobalState::new();
        assert_eq!(global.name(), GLOBAL_STATE);
        assert!(global.is_first_run().unwrap());
        assert_eq!(global.profile_iteration().unwrap(), 1);
    }

    #[test]
    fn test_accessors_are_idempotent() {
        let mut global = GlobalState::new();
        global.set_profile_iteration(2);
        global.set_profile_iteration(2);
        global.set_first_run(false);

        assert_eq!(global.profile_iteration().unwrap(), 2);
        assert_eq!(global.profile_iteration().unwrap(), 2);
        assert!(!global.is_first_run().unwrap());
        assert_eq!(global.properties().len(), 2);
    }

    #[test]
    fn test_wire_form_is_plain_state() {
        let json = serde_json::to_value(GlobalState::new()).unwrap();
        assert_eq!(json["name"], "GlobalState");
        assert_eq!(json["properties"]["ProfileIteration"], 1);
    }
}
