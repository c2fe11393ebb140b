//! OpenAI-compatible chat-completions client.
//!
//! One client serves every supported upstream: OpenAI, OpenRouter, DeepSeek,
//! Groq and any self-hosted endpoint speaking the same protocol. The only
//! per-provider difference on the request side is how reasoning is asked
//! for, which the [`ProviderAdapter`] decides.
//!
//! - URL: `{base_url}/chat/completions`
//! - Authentication: `Authorization: Bearer {api_key}`
//! - Streaming: server-sent events terminated by `data: [DONE]`

use crate::normalize::ProviderAdapter;
use crate::provider::{ChatProvider, RawChunkStream};
use crate::raw::{RawChunk, RawCompletion, RawErrorBody};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_core::{ChatRequest, GatewayError, GatewayResult};
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Event, RequestBuilderExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Connection settings for one upstream
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    /// Provider name used in routing, logs and metrics
    pub name: String,
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer key; `None` for unauthenticated local endpoints
    pub api_key: Option<SecretString>,
    /// Per-request timeout for buffered calls and stream connects
    pub timeout: Duration,
    /// Dialect
    pub adapter: ProviderAdapter,
    /// Extra headers, e.g. OpenRouter's `HTTP-Referer`
    pub headers: HashMap<String, String>,
}

impl OpenAiCompatConfig {
    /// Create a config with the default adapter for `name`
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            adapter: ProviderAdapter::for_provider(&name),
            name,
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(120),
            headers: HashMap::new(),
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the dialect
    #[must_use]
    pub fn with_adapter(mut self, adapter: ProviderAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Add a header sent with every request
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

/// HTTP client for an OpenAI-compatible upstream
#[derive(Debug)]
pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    client: Client,
}

impl OpenAiCompatProvider {
    /// Create a provider
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: OpenAiCompatConfig) -> GatewayResult<Self> {
        if config.base_url.is_empty() {
            return Err(GatewayError::Configuration {
                message: format!("provider '{}' has no base_url", config.name),
            });
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Dialect of this provider
    #[must_use]
    pub fn adapter(&self) -> ProviderAdapter {
        self.config.adapter
    }

    /// Build the upstream request body
    fn request_body(&self, request: &ChatRequest, stream: bool) -> GatewayResult<Value> {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert("messages".to_string(), to_json(&request.messages)?);

        if let Value::Object(sampling) = to_json(&request.sampling)? {
            body.extend(sampling);
        }
        if let Some(tools) = &request.tools {
            body.insert("tools".to_string(), to_json(tools)?);
        }
        if let Some(tool_choice) = &request.tool_choice {
            body.insert("tool_choice".to_string(), to_json(tool_choice)?);
        }
        if let Some(user) = &request.user {
            body.insert("user".to_string(), json!(user));
        }
        if let Some(reasoning) = &request.reasoning {
            self.config.adapter.apply_reasoning(reasoning, &mut body);
        }
        if stream {
            body.insert("stream".to_string(), json!(true));
            body.insert("stream_options".to_string(), json!({ "include_usage": true }));
        }

        Ok(Value::Object(body))
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.config.completions_url())
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        for (name, value) in &self.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn transport_error(&self, e: &reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            return GatewayError::timeout(self.config.timeout);
        }
        GatewayError::provider(&self.config.name, format!("Request failed: {e}"), None, true)
    }
}

/// Map a non-success response to the gateway taxonomy
fn map_error_body(provider: &str, status: StatusCode, body: &str) -> GatewayError {
    let (message, code) = match serde_json::from_str::<RawErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => {
            let code = parsed.error.code_str();
            (parsed.error.message, code)
        }
        _ => (format!("{status}: {body}"), None),
    };
    GatewayError::from_upstream(provider, status.as_u16(), code.as_deref(), message)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> GatewayResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::internal(format!("Failed to encode request: {e}")))
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &ChatRequest) -> GatewayResult<RawCompletion> {
        let body = self.request_body(request, false)?;

        debug!(
            provider = %self.config.name,
            model = %request.model,
            request_id = %request.id,
            "Sending request upstream"
        );

        let response = self
            .post(&body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.config.name, status = %status, "Upstream returned error");
            return Err(map_error_body(&self.config.name, status, &body));
        }

        response.json::<RawCompletion>().await.map_err(|e| {
            GatewayError::provider(
                &self.config.name,
                format!("Failed to parse response: {e}"),
                None,
                false,
            )
        })
    }

    async fn stream(&self, request: &ChatRequest) -> GatewayResult<RawChunkStream> {
        let body = self.request_body(request, true)?;

        debug!(
            provider = %self.config.name,
            model = %request.model,
            request_id = %request.id,
            "Starting streaming request upstream"
        );

        let mut event_source = self.post(&body).eventsource().map_err(|e| {
            GatewayError::provider(
                &self.config.name,
                format!("Failed to create event source: {e}"),
                None,
                false,
            )
        })?;
        // A broken stream is surfaced to the caller, never silently replayed.
        event_source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let provider = self.config.name.clone();

        let stream = try_stream! {
            let mut es = event_source;

            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {
                        trace!(provider = %provider, "Upstream stream opened");
                    }
                    Ok(Event::Message(msg)) => {
                        let data = msg.data.trim();
                        if data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<RawChunk>(data) {
                            Ok(chunk) => yield chunk,
                            Err(e) => {
                                warn!(provider = %provider, error = %e, data = %data, "Failed to parse chunk");
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let body = response.text().await.unwrap_or_default();
                        es.close();
                        Err(map_error_body(&provider, status, &body))?;
                    }
                    Err(e) => {
                        error!(provider = %provider, error = %e, "Upstream stream error");
                        es.close();
                        Err(GatewayError::provider(&provider, format!("Stream error: {e}"), None, true))?;
                    }
                }
            }
            es.close();
        };

        Ok(Box::pin(stream))
    }
}
