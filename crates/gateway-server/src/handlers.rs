//! HTTP request handlers for the gateway API.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use gateway_core::{ChatRequest, GatewayError, UnifiedResponse};
use gateway_resilience::CircuitBreakerStats;
use serde::Serialize;
use tracing::{debug, error, instrument};

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Registered providers
    pub providers: usize,
    /// Open sessions
    pub sessions: usize,
    /// In-flight requests
    pub active_requests: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.providers.is_empty() {
            "degraded"
        } else {
            "healthy"
        },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        providers: state.providers.len(),
        sessions: state.sessions.session_count(),
        active_requests: state.orchestrator.active_requests(),
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Buffered chat completion
///
/// Streaming is only offered over a session, so `stream: true` is rejected
/// here.
#[instrument(skip_all)]
pub async fn chat_completion(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<UnifiedResponse>> {
    let request: ChatRequest = serde_json::from_slice(&body).map_err(|e| {
        GatewayError::validation(format!("invalid request body: {e}"), None, "invalid_json")
    })?;

    if request.stream {
        return Err(ApiError(GatewayError::validation(
            "streaming is available over /v1/ws sessions",
            Some("stream".to_string()),
            "streaming_requires_session",
        )));
    }

    debug!(request_id = %request.id, model = %request.model, "Chat completion request");
    let response = state.orchestrator.process_request(request).await?;
    Ok(Json(response))
}

/// One provider in the listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider name
    pub name: String,
    /// Response dialect
    pub adapter: String,
    /// Breaker state, once the provider has been called
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitBreakerStats>,
}

/// List registered providers and their breaker state
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let breakers = state.breakers.snapshot();
    let mut providers: Vec<ProviderInfo> = state
        .providers
        .names()
        .into_iter()
        .filter_map(|name| {
            let entry = state.providers.get(&name)?;
            let circuit = breakers
                .iter()
                .find(|(provider, _)| *provider == name)
                .map(|(_, stats)| stats.clone());
            Some(ProviderInfo {
                adapter: entry.adapter.as_str().to_string(),
                name,
                circuit,
            })
        })
        .collect();
    providers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(providers)
}
