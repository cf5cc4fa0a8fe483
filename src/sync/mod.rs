//! Waiting for a remote participant's state to converge.
//!
//! Participants publish states under well-known ids. The polling helpers read
//! one id repeatedly until its state satisfies a predicate, the polling timeout
//! elapses, or the caller's signal fires.

use crate::core::cancellation::CancellationSignal;
use crate::core::config::{ComparisonConfig, PollingConfig};
use crate::core::errors::{LockstepError, Result};
use crate::state::{ClientServerState, ClientServerStatus, State, StateRecord};
use crate::wire::envelope::Item;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Read access to published states
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn get_state(&self, id: &str) -> anyhow::Result<Option<Item<State>>>;
}

/// Process-local state store, also usable as a [`StateSource`]
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    items: Arc<DashMap<String, Item<State>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the state under `id`. An existing record keeps its
    /// creation time.
    pub fn save<S: Into<String>>(&self, id: S, state: State) -> Item<State> {
        let id = id.into();
        let mut entry = self
            .items
            .entry(id.clone())
            .or_insert_with(|| Item::new(id, state.clone()));
        entry.update(state);
        entry.value().clone()
    }

    pub fn get(&self, id: &str) -> Option<Item<State>> {
        self.items.get(id).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, id: &str) -> bool {
        self.items.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl StateSource for InMemoryStateStore {
    async fn get_state(&self, id: &str) -> anyhow::Result<Option<Item<State>>> {
        Ok(self.get(id))
    }
}

/// Poll `id` until `predicate` holds for its state.
///
/// Read errors from the source are logged and retried. Fails with `Timeout`
/// once `config.timeout()` has passed and with `Cancelled` when `signal` fires.
pub async fn poll_for_state<S, P>(
    source: &S,
    id: &str,
    predicate: P,
    config: &PollingConfig,
    signal: &CancellationSignal,
) -> Result<Item<State>>
where
    S: StateSource + ?Sized,
    P: Fn(&Item<State>) -> bool,
{
    let operation = format!("poll for state '{}'", id);
    let deadline = Instant::now() + config.timeout();
    let mut attempts: u64 = 0;

    loop {
        if signal.is_cancelled() {
            return Err(LockstepError::cancelled(operation));
        }

        attempts += 1;
        match source.get_state(id).await {
            Ok(Some(item)) if predicate(&item) => {
                debug!(id, attempts, "state converged");
                return Ok(item);
            }
            Ok(_) => {}
            Err(error) => warn!(id, attempts, error = %format!("{:#}", error), "state read failed"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(LockstepError::timeout(
                operation,
                config.timeout().as_millis() as u64,
            ));
        }

        let wait = config.interval().min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = signal.cancelled() => return Err(LockstepError::cancelled(operation)),
        }
    }
}

/// Poll until the state under `id` deep-equals `expected` under the
/// configured numeric policy
pub async fn poll_for_expected_state<S, E>(
    source: &S,
    id: &str,
    expected: &E,
    comparison: &ComparisonConfig,
    config: &PollingConfig,
    signal: &CancellationSignal,
) -> Result<Item<State>>
where
    S: StateSource + ?Sized,
    E: StateRecord + ?Sized,
{
    poll_for_state(
        source,
        id,
        |item| comparison.deep_equals(&item.definition, expected),
        config,
        signal,
    )
    .await
}

/// Poll until the client/server state under `id` reports `status`
pub async fn poll_for_status<S>(
    source: &S,
    id: &str,
    status: ClientServerStatus,
    config: &PollingConfig,
    signal: &CancellationSignal,
) -> Result<ClientServerState>
where
    S: StateSource + ?Sized,
{
    let item = poll_for_state(
        source,
        id,
        |item| {
            ClientServerState::from_state(item.definition.clone())
                .map(|state| state.status() == status)
                .unwrap_or(false)
        },
        config,
        signal,
    )
    .await?;
    ClientServerState::from_state(item.definition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_keeps_created() {
        let store = InMemoryStateStore::new();
        let first = store.save("s1", State::new("TempState").with("Step", 1));
        let second = store.save("s1", State::new("TempState").with("Step", 2));

        assert_eq!(first.created, second.created);
        assert_eq!(store.get("s1").unwrap().definition.properties().get::<i64>("step").unwrap(), 2);
        assert!(store.delete("s1"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_already_converged_returns_immediately() {
        let store = InMemoryStateStore::new();
        store.save("ready", ClientServerState::new(ClientServerStatus::Ready).into_state());

        let state = poll_for_status(
            &store,
            "ready",
            ClientServerStatus::Ready,
            &PollingConfig { interval_ms: 10, timeout_secs: 1 },
            &CancellationSignal::new(),
        )
        .await
        .unwrap();
        assert_eq!(state.status(), ClientServerStatus::Ready);
    }
}
