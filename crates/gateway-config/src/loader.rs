//! Loading configuration from files and the environment.

use crate::schema::GatewayConfig;
use gateway_telemetry::LogFormat;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use validator::Validate;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG";

const ENV_PREFIX: &str = "GATEWAY_";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Unknown file extension
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An environment override had a bad value
    #[error("Invalid value for {var}: {message}")]
    InvalidEnv {
        /// Variable name
        var: String,
        /// What was wrong
        message: String,
    },

    /// Semantic validation failed
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    ///
    /// # Errors
    /// Returns `UnsupportedFormat` for anything else
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Parse a config document without touching the environment
///
/// # Errors
/// Returns `Parse` if the document is malformed
pub fn parse_config(
    content: &str,
    format: ConfigFormat,
    path: &Path,
) -> Result<GatewayConfig, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match format {
        ConfigFormat::Yaml if content.trim().is_empty() => Ok(GatewayConfig::default()),
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}

/// Load configuration.
///
/// Reads `path`, or the file named by `GATEWAY_CONFIG`, or falls back to
/// defaults. `GATEWAY_*` variables are applied on top, provider keys are
/// resolved from their `api_key_env`, and the result is validated.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, an override is
/// malformed, or validation fails
pub async fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

    let mut config = match path {
        Some(path) => {
            let format = ConfigFormat::from_path(&path)?;
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), ?format, "Read config file");
            parse_config(&content, format, &path)?
        }
        None => {
            info!("No config file given, using defaults");
            GatewayConfig::default()
        }
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    config.validate()?;

    info!(
        providers = config.enabled_providers().count(),
        models = config.models.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Apply `GATEWAY_*` overrides and resolve provider keys.
///
/// `lookup` reads one variable; tests pass a map instead of the process
/// environment.
///
/// # Errors
/// Returns `InvalidEnv` if a numeric or enum override does not parse
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(host) = var("HOST") {
        config.server.host = parse_env("GATEWAY_HOST", &host)?;
    }
    if let Some(port) = var("PORT") {
        config.server.port = parse_env("GATEWAY_PORT", &port)?;
    }
    if let Some(max) = var("MAX_SESSIONS") {
        config.server.max_sessions = parse_env("GATEWAY_MAX_SESSIONS", &max)?;
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = var("LOG_FORMAT") {
        config.logging.format = match format.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidEnv {
                    var: "GATEWAY_LOG_FORMAT".to_string(),
                    message: format!("unknown format '{other}'"),
                })
            }
        };
    }
    if let Some(provider) = var("DEFAULT_PROVIDER") {
        config.default_provider = Some(provider);
    }
    if let Some(secs) = var("REQUEST_TIMEOUT_SECS") {
        let secs: u64 = parse_env("GATEWAY_REQUEST_TIMEOUT_SECS", &secs)?;
        config.timeouts.request = Duration::from_secs(secs);
    }
    if let Some(enabled) = var("CACHE_ENABLED") {
        config.resilience.cache.enabled = parse_env("GATEWAY_CACHE_ENABLED", &enabled)?;
    }

    for provider in &mut config.providers {
        let conventional = format!(
            "{}_API_KEY",
            provider.name.to_ascii_uppercase().replace(['-', '.'], "_")
        );
        let key = provider
            .api_key_env
            .as_deref()
            .and_then(&lookup)
            .or_else(|| var(&conventional));
        if let Some(key) = key {
            provider.api_key = Some(SecretString::new(key));
        } else if provider.api_key.is_none() && provider.enabled {
            warn!(provider = %provider.name, "Provider has no API key configured");
        }
    }

    Ok(())
}

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        message: e.to_string(),
    })
}
