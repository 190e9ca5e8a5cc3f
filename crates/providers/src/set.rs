//! Provider adapters paired with their capability entries.

use std::collections::HashMap;
use std::sync::Arc;

use shotline_core::capability::{CapabilityRegistry, ProviderCapability};
use shotline_core::error::CoreError;
use shotline_core::types::ProviderId;

use crate::provider::VideoProvider;

/// Resolves a provider id to its adapter at admission time.
///
/// Only providers that are both in the capability registry and have a
/// registered adapter can be scheduled.
#[derive(Clone)]
pub struct ProviderSet {
    registry: CapabilityRegistry,
    adapters: HashMap<ProviderId, Arc<dyn VideoProvider>>,
}

impl ProviderSet {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            adapters: HashMap::new(),
        }
    }

    /// Attach an adapter. Its id must exist in the registry.
    pub fn register(&mut self, adapter: Arc<dyn VideoProvider>) -> Result<(), CoreError> {
        let id = adapter.id().to_string();
        if self.registry.get(&id).is_none() {
            return Err(CoreError::Validation(format!(
                "No capability entry for provider '{id}'"
            )));
        }
        if self.adapters.insert(id.clone(), adapter).is_some() {
            tracing::warn!(provider_id = %id, "Replacing provider adapter");
        }
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn VideoProvider>) -> Result<Self, CoreError> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn VideoProvider>> {
        self.adapters.get(id).cloned()
    }

    pub fn capability(&self, id: &str) -> Option<&ProviderCapability> {
        self.registry.get(id)
    }

    /// Full capability registry, including providers without an adapter.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Registry restricted to providers that can actually be called.
    pub fn schedulable_registry(&self) -> CapabilityRegistry {
        let entries = self
            .registry
            .iter()
            .filter(|c| self.adapters.contains_key(&c.id))
            .cloned();
        // Entries were validated when the registry was built.
        CapabilityRegistry::from_providers(entries).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
