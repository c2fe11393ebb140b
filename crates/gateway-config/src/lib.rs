//! # Gateway Config
//!
//! File and environment configuration for the LLM Chat Gateway.
//!
//! Configuration is read once at startup from YAML, TOML or JSON, overlaid
//! with `GATEWAY_*` environment variables and validated before any service
//! is built.
//!
//! ```yaml
//! server:
//!   port: 8080
//! default_provider: openrouter
//! providers:
//!   - name: openrouter
//!     base_url: https://openrouter.ai/api/v1
//!     api_key_env: OPENROUTER_API_KEY
//! models:
//!   - provider: openrouter
//!     model: deepseek/deepseek-r1
//!     reasoning: true
//!     max_context: 64000
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod loader;
mod schema;

pub use loader::{
    apply_env_overrides, load_config, parse_config, ConfigError, ConfigFormat, CONFIG_PATH_ENV,
};
pub use schema::{
    BreakerSettings, CacheSettings, GatewayConfig, LoggingSettings, ModelSettings,
    ProviderSettings, RateLimitSettings, ResilienceSettings, RetrySettings, ServerSettings,
    SessionSettings, TimeoutSettings, WindowSettings,
};
