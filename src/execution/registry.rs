//! Static table of known component kinds.
//!
//! Built-in kinds are collected at link time through [`COMPONENTS`]; more can
//! be added at runtime. Lookups match the kind or any alias, ignoring case.

use crate::core::errors::{LockstepError, Result};
use crate::instructions::instruction::Instruction;
use crate::state::property_bag::names_match;
use dashmap::DashMap;
use linkme::distributed_slice;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub kind: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ComponentMetadata {
    pub fn new<K: Into<String>, D: Into<String>>(kind: K, description: D) -> Self {
        Self {
            kind: kind.into(),
            aliases: Vec::new(),
            description: description.into(),
        }
    }

    pub fn with_alias<A: Into<String>>(mut self, alias: A) -> Self {
        self.aliases.push(alias.into());
        self
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.kind.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[distributed_slice]
pub static COMPONENTS: [fn() -> ComponentMetadata] = [..];

#[distributed_slice(COMPONENTS)]
static PARALLEL_EXECUTION: fn() -> ComponentMetadata = parallel_execution;

#[distributed_slice(COMPONENTS)]
static SEQUENTIAL_EXECUTION: fn() -> ComponentMetadata = sequential_execution;

fn parallel_execution() -> ComponentMetadata {
    ComponentMetadata::new(
        "ParallelExecution",
        "Runs its child components concurrently and fails if any of them fails",
    )
    .with_alias("Parallel")
}

fn sequential_execution() -> ComponentMetadata {
    ComponentMetadata::new(
        "SequentialExecution",
        "Runs its child components in order and stops at the first failure",
    )
    .with_alias("Sequential")
}

pub struct ComponentRegistry {
    by_name: DashMap<String, Arc<ComponentMetadata>>,
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
        }
    }

    /// A registry holding every kind in [`COMPONENTS`]
    pub fn with_builtins() -> Result<Self> {
        let registry = Self::new();
        for factory in COMPONENTS.iter() {
            registry.register(factory())?;
        }
        Ok(registry)
    }

    /// Add a kind. Re-registering the same kind replaces it; a name already
    /// claimed by a different kind is rejected.
    pub fn register(&self, metadata: ComponentMetadata) -> Result<()> {
        for name in metadata.names() {
            if let Some(existing) = self.by_name.get(&name.to_lowercase()) {
                if !names_match(&existing.kind, &metadata.kind) {
                    return Err(LockstepError::configuration_field(
                        format!("component name '{}' is already used by '{}'", name, existing.kind),
                        "components",
                    ));
                }
            }
        }

        debug!(kind = %metadata.kind, aliases = metadata.aliases.len(), "registered component");
        let metadata = Arc::new(metadata);
        for name in metadata.names() {
            self.by_name.insert(name.to_lowercase(), metadata.clone());
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<ComponentMetadata>> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_lowercase())
    }

    /// Registered kinds, sorted, without aliases
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .by_name
            .iter()
            .map(|entry| entry.value().kind.clone())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Metadata for each component an instruction carries, in order. Fails on
    /// the first unknown kind.
    pub fn resolve_components(&self, instruction: &Instruction) -> Result<Vec<Arc<ComponentMetadata>>> {
        instruction
            .components()
            .iter()
            .map(|spec| {
                self.resolve(&spec.type_name).ok_or_else(|| {
                    LockstepError::configuration_field(
                        format!("unknown component kind '{}'", spec.type_name),
                        "components",
                    )
                })
            })
            .collect()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref COMPONENT_REGISTRY: ComponentRegistry = {
        let registry = ComponentRegistry::new();
        for factory in COMPONENTS.iter() {
            if let Err(e) = registry.register(factory()) {
                tracing::error!(error = %e, "skipping conflicting built-in component");
            }
        }
        registry
    };
}
