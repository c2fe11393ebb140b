//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque correlation id for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a live duplex session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider and model resolved from a request's model string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelTarget {
    /// Provider name, e.g. `openrouter`
    pub provider: String,
    /// Provider-local model id, e.g. `anthropic/claude-3.5-sonnet`
    pub model: String,
}

impl ModelTarget {
    /// Split `provider/model` at the first slash, falling back to the
    /// default provider for bare model names.
    #[must_use]
    pub fn resolve(model: &str, default_provider: Option<&str>) -> Option<Self> {
        let model = model.trim();
        if model.is_empty() {
            return None;
        }
        match model.split_once('/') {
            Some((provider, rest)) if !provider.is_empty() && !rest.is_empty() => Some(Self {
                provider: provider.to_string(),
                model: rest.to_string(),
            }),
            Some(_) => None,
            None => default_provider.map(|provider| Self {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
        }
    }

    /// Rate-limit and cache identity, `provider/model`
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_qualified_model() {
        let target = ModelTarget::resolve("openrouter/anthropic/claude-3.5-sonnet", None)
            .expect("resolves");
        assert_eq!(target.provider, "openrouter");
        assert_eq!(target.model, "anthropic/claude-3.5-sonnet");
        assert_eq!(target.qualified(), "openrouter/anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn test_resolve_bare_model() {
        assert!(ModelTarget::resolve("gpt-4o", None).is_none());
        let target = ModelTarget::resolve("gpt-4o", Some("openai")).expect("resolves");
        assert_eq!(target.provider, "openai");
        assert!(ModelTarget::resolve("/gpt-4o", Some("openai")).is_none());
        assert!(ModelTarget::resolve("  ", Some("openai")).is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
