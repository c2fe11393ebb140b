//! Configuration schema.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a runnable gateway with no providers.

use gateway_core::{ModelCapabilities, ModelDescriptor, Pricing, StaticModelCatalog};
use gateway_providers::{OpenAiCompatConfig, ProviderAdapter};
use gateway_resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig, WindowLimit};
use gateway_telemetry::{LogFormat, LoggingConfig};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_references"))]
pub struct GatewayConfig {
    /// Listener settings
    #[validate(nested)]
    pub server: ServerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Upstream providers
    #[validate(nested)]
    pub providers: Vec<ProviderSettings>,
    /// Provider used for bare model names
    pub default_provider: Option<String>,
    /// Model catalog entries
    #[validate(nested)]
    pub models: Vec<ModelSettings>,
    /// Breaker, retry, rate limit and cache settings
    #[validate(nested)]
    pub resilience: ResilienceSettings,
    /// Session heartbeat and idle settings
    #[validate(nested)]
    pub session: SessionSettings,
    /// Request deadlines
    pub timeouts: TimeoutSettings,
}

impl GatewayConfig {
    /// Providers with `enabled: true`
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Build the catalog from the `models` section
    #[must_use]
    pub fn catalog(&self) -> StaticModelCatalog {
        let mut catalog = StaticModelCatalog::new();
        for entry in &self.models {
            catalog.insert(&entry.provider, &entry.model, entry.descriptor());
        }
        catalog
    }
}

fn validate_references(config: &GatewayConfig) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.name.as_str()) {
            return Err(ValidationError::new("duplicate_provider"));
        }
    }

    if let Some(default) = &config.default_provider {
        if !config.providers.iter().any(|p| &p.name == default) {
            return Err(ValidationError::new("unknown_default_provider"));
        }
    }

    if config
        .models
        .iter()
        .any(|m| !config.providers.iter().any(|p| p.name == m.provider))
    {
        return Err(ValidationError::new("model_references_unknown_provider"));
    }

    Ok(())
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: IpAddr,
    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,
    /// Concurrent session cap enforced by the WebSocket route
    #[validate(range(min = 1))]
    pub max_sessions: usize,
    /// Time allowed for in-flight work after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            max_sessions: 1000,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerSettings {
    /// Socket address to bind
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include file and line
    pub file_line: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file_line: false,
        }
    }
}

impl LoggingSettings {
    /// Subscriber configuration
    #[must_use]
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig::new(&self.level)
            .with_format(self.format)
            .with_file_line(self.file_line)
    }
}

/// One upstream provider
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProviderSettings {
    /// Routing name, the `provider` half of `provider/model`
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Base URL including the version segment
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,
    /// Inline key; prefer `api_key_env`
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Environment variable holding the key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Dialect; defaults to the one registered for `name`
    #[serde(default)]
    pub adapter: Option<ProviderAdapter>,
    /// Upstream request timeout
    #[serde(with = "humantime_serde", default = "default_provider_timeout")]
    pub timeout: Duration,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether the provider is registered
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(120)
}

const fn default_true() -> bool {
    true
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(_) => Err(ValidationError::new("base_url_scheme")),
        Err(_) => Err(ValidationError::new("base_url")),
    }
}

impl ProviderSettings {
    /// Dialect for this provider
    #[must_use]
    pub fn adapter(&self) -> ProviderAdapter {
        self.adapter
            .unwrap_or_else(|| ProviderAdapter::for_provider(&self.name))
    }

    /// HTTP client configuration
    #[must_use]
    pub fn to_client_config(&self) -> OpenAiCompatConfig {
        let mut config = OpenAiCompatConfig::new(&self.name, &self.base_url)
            .with_timeout(self.timeout)
            .with_adapter(self.adapter());
        config.api_key = self.api_key.clone();
        for (name, value) in &self.headers {
            config = config.with_header(name, value);
        }
        config
    }
}

/// One catalog entry
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModelSettings {
    /// Provider name
    #[validate(length(min = 1))]
    pub provider: String,
    /// Provider-local model id
    #[validate(length(min = 1))]
    pub model: String,
    /// Accepts images
    #[serde(default)]
    pub vision: bool,
    /// Supports tools
    #[serde(default)]
    pub tools: bool,
    /// Produces reasoning
    #[serde(default)]
    pub reasoning: bool,
    /// Context window in tokens
    #[validate(range(min = 1))]
    pub max_context: u32,
    /// USD per million prompt tokens
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub prompt_price: f64,
    /// USD per million completion tokens
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub completion_price: f64,
}

impl ModelSettings {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            capabilities: ModelCapabilities {
                vision: self.vision,
                tools: self.tools,
                reasoning: self.reasoning,
                max_context: self.max_context,
            },
            pricing: Pricing {
                prompt_per_million: self.prompt_price,
                completion_per_million: self.completion_price,
            },
        }
    }
}

/// Resilience settings
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Circuit breaker
    #[validate(nested)]
    pub circuit_breaker: BreakerSettings,
    /// Retry with backoff
    #[validate(nested)]
    pub retry: RetrySettings,
    /// Admission limits
    #[validate(nested)]
    pub rate_limits: RateLimitSettings,
    /// Response cache
    #[validate(nested)]
    pub cache: CacheSettings,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before opening
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Open duration before a trial request
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            reset_timeout: defaults.reset_timeout,
        }
    }
}

impl BreakerSettings {
    /// Breaker configuration
    #[must_use]
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    #[validate(range(max = 10))]
    pub max_retries: u32,
    /// First backoff delay
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff growth factor
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    /// Random spread, 0 to 1
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay: defaults.base_delay,
            max_delay: defaults.max_delay,
            multiplier: defaults.multiplier,
            jitter: defaults.jitter,
        }
    }
}

impl RetrySettings {
    /// Retry configuration
    #[must_use]
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// A fixed window
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct WindowSettings {
    /// Requests per window
    #[validate(range(min = 1))]
    pub max: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl From<WindowLimit> for WindowSettings {
    fn from(limit: WindowLimit) -> Self {
        Self {
            max: limit.max,
            window: limit.window,
        }
    }
}

impl From<WindowSettings> for WindowLimit {
    fn from(settings: WindowSettings) -> Self {
        Self::new(settings.max, settings.window)
    }
}

/// Admission limits per keyspace
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Per provider
    #[validate(nested)]
    pub provider: WindowSettings,
    /// Per `provider/model`
    #[validate(nested)]
    pub model: WindowSettings,
    /// Per end user
    #[validate(nested)]
    pub user: WindowSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            provider: defaults.provider.into(),
            model: defaults.model.into(),
            user: defaults.user.into(),
        }
    }
}

impl RateLimitSettings {
    /// Rate limiter configuration
    #[must_use]
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            provider: self.provider.into(),
            model: self.model.into(),
            user: self.user.into(),
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether buffered responses are cached
    pub enabled: bool,
    /// Entry lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// In-memory capacity
    #[validate(range(min = 1))]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

/// Session maintenance settings
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_session"))]
pub struct SessionSettings {
    /// Ping interval
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Inactivity before a session is swept
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Sweep interval
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn validate_session(settings: &SessionSettings) -> Result<(), ValidationError> {
    if settings.heartbeat_interval.is_zero() || settings.sweep_interval.is_zero() {
        return Err(ValidationError::new("zero_interval"));
    }
    Ok(())
}

/// Request deadlines
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Hard deadline for one request
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// Longest gap allowed between streamed chunks
    #[serde(with = "humantime_serde")]
    pub stream_stall: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(120),
            stream_stall: Duration::from_secs(60),
        }
    }
}
