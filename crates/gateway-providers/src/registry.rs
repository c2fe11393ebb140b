//! Provider registry.
//!
//! Maps provider names to a client and the dialect used to normalize its
//! responses. The registry is built at startup and shared behind an `Arc`.

use crate::normalize::ProviderAdapter;
use crate::provider::ChatProvider;
use dashmap::DashMap;
use gateway_core::{GatewayError, GatewayResult};
use std::sync::Arc;
use tracing::info;

/// A registered provider
#[derive(Clone)]
pub struct ProviderEntry {
    /// Client
    pub provider: Arc<dyn ChatProvider>,
    /// Dialect of its responses
    pub adapter: ProviderAdapter,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("provider", &self.provider.name())
            .field("adapter", &self.adapter)
            .finish()
    }
}

/// Providers by name
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with the adapter registered for its name
    ///
    /// # Errors
    /// Returns an error if the name is already taken
    pub fn register(&self, provider: Arc<dyn ChatProvider>) -> GatewayResult<()> {
        let adapter = ProviderAdapter::for_provider(provider.name());
        self.register_with_adapter(provider, adapter)
    }

    /// Register a provider with an explicit adapter
    ///
    /// # Errors
    /// Returns an error if the name is already taken
    pub fn register_with_adapter(
        &self,
        provider: Arc<dyn ChatProvider>,
        adapter: ProviderAdapter,
    ) -> GatewayResult<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(GatewayError::Configuration {
                message: format!("provider '{name}' registered twice"),
            });
        }

        info!(provider = %name, adapter = %adapter, "Registered provider");
        self.providers
            .insert(name, ProviderEntry { provider, adapter });
        Ok(())
    }

    /// Look up a provider
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ProviderEntry> {
        self.providers.get(name).map(|entry| entry.value().clone())
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(ScriptedProvider::new("deepseek")))
            .expect("register");
        registry
            .register_with_adapter(
                Arc::new(ScriptedProvider::new("local")),
                ProviderAdapter::Groq,
            )
            .expect("register");

        assert_eq!(
            registry.get("deepseek").map(|e| e.adapter),
            Some(ProviderAdapter::DeepSeek)
        );
        assert_eq!(
            registry.get("local").map(|e| e.adapter),
            Some(ProviderAdapter::Groq)
        );
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["deepseek", "local"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(ScriptedProvider::new("openai")))
            .expect("register");
        assert!(registry
            .register(Arc::new(ScriptedProvider::new("openai")))
            .is_err());
        assert_eq!(registry.len(), 1);
    }
}
