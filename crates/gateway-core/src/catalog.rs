//! Model catalog lookups.
//!
//! The catalog is an external collaborator; the gateway only reads from it.
//! [`StaticModelCatalog`] serves descriptors loaded from configuration.

use crate::error::GatewayError;
use crate::request::RequestedCapabilities;
use crate::response::UnifiedUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capability and pricing information for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Feature flags
    pub capabilities: ModelCapabilities,
    /// Prices
    #[serde(default)]
    pub pricing: Pricing,
}

/// Model feature flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Accepts image inputs
    #[serde(default)]
    pub vision: bool,
    /// Supports tool calling
    #[serde(default)]
    pub tools: bool,
    /// Produces reasoning
    #[serde(default)]
    pub reasoning: bool,
    /// Context window in tokens
    pub max_context: u32,
}

impl ModelCapabilities {
    /// Reject a request that needs something this model lacks
    ///
    /// # Errors
    /// Returns `CapabilityMismatch` naming the first missing capability
    pub fn check(
        &self,
        model: &str,
        requested: RequestedCapabilities,
        prompt_tokens: u32,
    ) -> Result<(), GatewayError> {
        if requested.vision && !self.vision {
            return Err(GatewayError::capability_mismatch(model, "vision"));
        }
        if requested.tools && !self.tools {
            return Err(GatewayError::capability_mismatch(model, "tools"));
        }
        if requested.reasoning && !self.reasoning {
            return Err(GatewayError::capability_mismatch(model, "reasoning"));
        }
        if self.max_context > 0 && prompt_tokens > self.max_context {
            return Err(GatewayError::capability_mismatch(
                model,
                format!("a {prompt_tokens}-token prompt (context is {})", self.max_context),
            ));
        }
        Ok(())
    }
}

/// USD per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Prompt price
    #[serde(default)]
    pub prompt_per_million: f64,
    /// Completion price
    #[serde(default)]
    pub completion_per_million: f64,
}

impl Pricing {
    /// Cost of a usage record
    #[must_use]
    pub fn cost(&self, usage: &UnifiedUsage) -> f64 {
        (f64::from(usage.prompt_tokens) * self.prompt_per_million
            + f64::from(usage.completion_tokens) * self.completion_per_million)
            / 1_000_000.0
    }
}

/// Read-only model catalog
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Look up a provider-local model id
    async fn describe(&self, provider: &str, model: &str) -> Option<ModelDescriptor>;
}

/// In-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: HashMap<(String, String), ModelDescriptor>,
}

impl StaticModelCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model
    #[must_use]
    pub fn with_model(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        descriptor: ModelDescriptor,
    ) -> Self {
        self.insert(provider, model, descriptor);
        self
    }

    /// Add a model in place
    pub fn insert(
        &mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        descriptor: ModelDescriptor,
    ) {
        self.models.insert((provider.into(), model.into()), descriptor);
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelCatalog for StaticModelCatalog {
    async fn describe(&self, provider: &str, model: &str) -> Option<ModelDescriptor> {
        self.models
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
    }
}
