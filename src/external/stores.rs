use crate::state::property_bag::names_match;
use serde::{Deserialize, Serialize};

/// Opaque reference to an external store (blob, file share, proxy, key vault).
/// Passed through to collaborators; `kind` is never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStore {
    pub name: String,
    pub kind: String,
    pub endpoint: String,
}

impl DependencyStore {
    pub fn new<N, K, E>(name: N, kind: K, endpoint: E) -> Self
    where
        N: Into<String>,
        K: Into<String>,
        E: Into<String>,
    {
        Self {
            name: name.into(),
            kind: kind.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Find a store by name, ignoring case
pub fn find_store<'a>(stores: &'a [DependencyStore], name: &str) -> Option<&'a DependencyStore> {
    stores.iter().find(|store| names_match(&store.name, name))
}
