//! Error types for the gateway.
//!
//! Every failure that can reach a caller is a [`GatewayError`]. Each variant
//! belongs to exactly one [`ErrorKind`] so that the buffered path, the
//! streaming path and the circuit breaker all agree on how a failure is
//! treated, independent of which provider produced it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type used across gateway crates
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Provider-independent error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, never retried
    #[serde(rename = "validation_error")]
    Validation,
    /// Local admission denial
    RateLimited,
    /// Request needs a capability the model lacks
    CapabilityMismatch,
    /// Upstream failure, eligible for retry and breaker accounting
    #[serde(rename = "provider_error")]
    Provider,
    /// Upstream rejected our credentials
    AuthFailed,
    /// Local or upstream stall
    TimedOut,
    /// Explicit cancellation, a terminal status rather than a failure
    Cancelled,
    /// Dependency is temporarily unavailable (open circuit)
    #[serde(rename = "service_unavailable")]
    Unavailable,
    /// Anything else
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    /// Stable wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::RateLimited => "rate_limited",
            Self::CapabilityMismatch => "capability_mismatch",
            Self::Provider => "provider_error",
            Self::AuthFailed => "auth_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "service_unavailable",
            Self::Internal => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable message
        message: String,
        /// Offending field, if known
        field: Option<String>,
        /// Machine readable code
        code: String,
    },

    /// Admission control denied the request
    #[error("Rate limit exceeded for {scope}, retry after {retry_after:?}")]
    RateLimited {
        /// Limited key, e.g. `model:openai/gpt-4o`
        scope: String,
        /// Time until the window resets
        retry_after: Duration,
    },

    /// Requested capability is not supported by the model
    #[error("Model {model} does not support {capability}")]
    CapabilityMismatch {
        /// Model identifier
        model: String,
        /// Missing capability
        capability: String,
    },

    /// Upstream provider failure
    #[error("Provider {provider} error: {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
        /// Upstream HTTP status, if any
        status_code: Option<u16>,
        /// Whether a retry may succeed
        retryable: bool,
    },

    /// Upstream authentication failure
    #[error("Authentication with provider {provider} failed: {message}")]
    AuthFailed {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Request timed out
    #[error("Request timed out after {after:?}")]
    TimedOut {
        /// Elapsed budget
        after: Duration,
    },

    /// Request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Circuit breaker is open for the provider
    #[error("Provider {provider} unavailable, retry after {retry_after:?}")]
    ServiceUnavailable {
        /// Provider name
        provider: String,
        /// Time until the next trial request is allowed
        retry_after: Duration,
    },

    /// Provider response carried no choices
    #[error("Provider {provider} returned no choices")]
    NoChoices {
        /// Provider name
        provider: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited(scope: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            scope: scope.into(),
            retry_after,
        }
    }

    /// Create a capability mismatch error
    pub fn capability_mismatch(model: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::CapabilityMismatch {
            model: model.into(),
            capability: capability.into(),
        }
    }

    /// Create a provider error
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create an authentication error
    pub fn auth_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::TimedOut { after }
    }

    /// Create an open-circuit error
    pub fn service_unavailable(provider: impl Into<String>, retry_after: Duration) -> Self {
        Self::ServiceUnavailable {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify an upstream HTTP failure.
    ///
    /// The mapping only looks at the status and the provider's error code, so
    /// every provider lands in the same taxonomy.
    pub fn from_upstream(
        provider: impl Into<String>,
        status: u16,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        let message = message.into();
        match (status, code) {
            (401 | 403, _) | (_, Some("invalid_api_key" | "authentication_error")) => {
                Self::AuthFailed { provider, message }
            }
            (408 | 504, _) => Self::provider(provider, message, Some(status), true),
            (429, _) | (500..=599, _) => Self::provider(provider, message, Some(status), true),
            (_, Some("context_length_exceeded")) => Self::validation(message, None, "context_length_exceeded"),
            _ => Self::provider(provider, message, Some(status), false),
        }
    }

    /// Taxonomy bucket for this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CapabilityMismatch { .. } => ErrorKind::CapabilityMismatch,
            Self::Provider {
                status_code: Some(408 | 504),
                ..
            }
            | Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Provider { .. } | Self::NoChoices { .. } => ErrorKind::Provider,
            Self::AuthFailed { .. } => ErrorKind::AuthFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ServiceUnavailable { .. } => ErrorKind::Unavailable,
            Self::Configuration { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Machine readable code
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NoChoices { .. } => "no_choices",
            _ => self.kind().as_str(),
        }
    }

    /// Upstream status code, if the error came from an HTTP response
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Provider { status_code, .. } => *status_code,
            Self::AuthFailed { .. } => Some(401),
            _ => None,
        }
    }

    /// Suggested wait before retrying, for availability errors
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. }
            | Self::ServiceUnavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether a retry of the same upstream call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider {
                retryable,
                status_code,
                ..
            } => match status_code {
                Some(429) => true,
                Some(code) if (400..500).contains(code) => false,
                _ => *retryable,
            },
            Self::TimedOut { .. } => true,
            _ => false,
        }
    }

    /// Whether this error should count against a provider's circuit breaker
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Provider | ErrorKind::TimedOut | ErrorKind::AuthFailed
        )
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::CapabilityMismatch => 422,
            ErrorKind::RateLimited => 429,
            ErrorKind::AuthFailed => 502,
            ErrorKind::Provider => 502,
            ErrorKind::TimedOut => 504,
            ErrorKind::Cancelled => 499,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Wire representation
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            code: self.code().to_string(),
            message: self.to_string(),
            retry_after_ms: self.retry_after().map(|d| d.as_millis() as u64),
        }
    }
}

/// Serialized form of an error sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Taxonomy bucket
    pub kind: ErrorKind,
    /// Machine readable code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Milliseconds until a retry is sensible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}
