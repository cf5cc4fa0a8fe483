//! Static description of the participating instances and their roles.

use crate::core::errors::{LockstepError, Result};
use crate::state::property_bag::names_match;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Well-known participant roles
pub mod roles {
    pub const CLIENT: &str = "Client";
    pub const SERVER: &str = "Server";
    pub const REVERSE_PROXY: &str = "ReverseProxy";
}

/// One participant: logical name, network address and optional role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInstance {
    pub name: String,
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ClientInstance {
    pub fn new<N: Into<String>, A: Into<String>>(name: N, ip_address: A) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
            role: None,
        }
    }

    pub fn with_role<R: Into<String>>(mut self, role: R) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .map(|r| names_match(r, role))
            .unwrap_or(false)
    }
}

/// The read-only set of participants in one environment. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLayout")]
pub struct EnvironmentLayout {
    clients: Vec<ClientInstance>,
}

#[derive(Deserialize)]
struct RawLayout {
    #[serde(default)]
    clients: Vec<ClientInstance>,
}

impl TryFrom<RawLayout> for EnvironmentLayout {
    type Error = LockstepError;

    fn try_from(raw: RawLayout) -> Result<Self> {
        EnvironmentLayout::new(raw.clients)
    }
}

impl EnvironmentLayout {
    pub fn new(clients: Vec<ClientInstance>) -> Result<Self> {
        if clients.is_empty() {
            return Err(LockstepError::invalid_topology(
                "the environment layout must define at least one participant",
            ));
        }

        let mut seen = HashSet::new();
        for (index, client) in clients.iter().enumerate() {
            if client.name.trim().is_empty() {
                return Err(LockstepError::invalid_topology(format!(
                    "participant at position {} has a blank name",
                    index
                )));
            }
            if !seen.insert(client.name.to_lowercase()) {
                return Err(LockstepError::invalid_topology(format!(
                    "participant '{}' is defined more than once",
                    client.name
                )));
            }
        }

        debug!(participants = clients.len(), "environment layout loaded");
        Ok(Self { clients })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawLayout = serde_json::from_str(json)?;
        Self::new(raw.clients)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawLayout = serde_yaml::from_str(yaml)?;
        Self::new(raw.clients)
    }

    pub fn clients(&self) -> &[ClientInstance] {
        &self.clients
    }

    /// Participant by logical name, ignoring case
    pub fn get(&self, name: &str) -> Result<&ClientInstance> {
        self.clients
            .iter()
            .find(|client| names_match(&client.name, name))
            .ok_or_else(|| LockstepError::unknown_participant(name))
    }

    /// Participants with `role`, in input order
    pub fn instances_by_role(&self, role: &str) -> Vec<&ClientInstance> {
        self.clients.iter().filter(|c| c.has_role(role)).collect()
    }

    /// Like [`EnvironmentLayout::instances_by_role`] but fails when none match
    pub fn require_role(&self, role: &str) -> Result<Vec<&ClientInstance>> {
        let matches = self.instances_by_role(role);
        if matches.is_empty() {
            return Err(LockstepError::unknown_role(role));
        }
        Ok(matches)
    }

    /// True when more than one distinct role is in play
    pub fn is_multi_role(&self) -> bool {
        let roles: HashSet<String> = self
            .clients
            .iter()
            .filter_map(|c| c.role.as_deref())
            .map(str::to_lowercase)
            .collect();
        roles.len() > 1
    }
}
