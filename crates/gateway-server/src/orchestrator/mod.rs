//! Request orchestration.
//!
//! The [`RequestOrchestrator`] runs one chat request end to end:
//!
//! 1. validate and resolve `provider/model`
//! 2. admission control (provider, model and user windows)
//! 3. catalog lookup and capability check
//! 4. cache lookup (buffered only)
//! 5. upstream call through the provider's circuit breaker, with retries
//!    for buffered calls
//! 6. normalization, pricing, cache fill and usage accounting
//!
//! Streamed requests forward each chunk to their session as it arrives and
//! resolve to the accumulated response. Every in-flight request owns a
//! cancellation token and a pause flag reachable through [`RequestOrchestrator::cancel`],
//! [`RequestOrchestrator::pause`] and [`RequestOrchestrator::resume`].

pub mod accumulator;
pub mod cache_key;
pub mod dispatch;
pub mod tool_calls;

use crate::session::protocol::ServerMessage;
use crate::session::SessionManager;
use accumulator::StreamAccumulator;
use cache_key::cache_key;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use gateway_core::{
    ChatRequest, FinishReason, GatewayError, GatewayResult, ModelCatalog, ModelTarget, Pricing,
    RequestId, StaticModelCatalog, UnifiedResponse, UnifiedUsage,
};
use gateway_providers::{NormalizeOptions, ProviderEntry, ProviderRegistry};
use gateway_resilience::{
    BreakerPermit, CacheService, CircuitBreaker, CircuitBreakerRegistry, RetryPolicy,
};
use gateway_telemetry::{request_span, GatewayMetrics, RequestMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Budget for a buffered call, or for opening an upstream stream
    pub request_timeout: Duration,
    /// Longest wait for the next upstream chunk
    pub stream_stall_timeout: Duration,
    /// Serve and fill the response cache for buffered calls
    pub cache_enabled: bool,
    /// Provider for model names without a `provider/` prefix
    pub default_provider: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            stream_stall_timeout: Duration::from_secs(60),
            cache_enabled: true,
            default_provider: None,
        }
    }
}

#[derive(Debug)]
struct ActiveRequest {
    generation: u64,
    token: CancellationToken,
    pause: watch::Sender<bool>,
}

/// Registration of an in-flight request.
///
/// Dropping the handle deregisters the request.
#[derive(Debug)]
pub struct ActiveHandle {
    request_id: RequestId,
    generation: u64,
    token: CancellationToken,
    paused: watch::Receiver<bool>,
    active: Arc<DashMap<RequestId, ActiveRequest>>,
}

impl ActiveHandle {
    /// Request this handle registers
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Whether the request was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ActiveHandle {
    fn drop(&mut self) {
        // A newer registration under the same id must survive.
        let generation = self.generation;
        self.active
            .remove_if(&self.request_id, |_, a| a.generation == generation);
    }
}

/// Everything resolved before the upstream call
struct Resolved {
    target: ModelTarget,
    entry: ProviderEntry,
    breaker: Arc<CircuitBreaker>,
    pricing: Pricing,
    options: NormalizeOptions,
}

/// Runs chat requests through admission, resilience and normalization
pub struct RequestOrchestrator {
    config: OrchestratorConfig,
    providers: Arc<ProviderRegistry>,
    catalog: Arc<dyn ModelCatalog>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    rate_limits: Arc<gateway_resilience::RateLimitService>,
    cache: Arc<CacheService>,
    sessions: Arc<SessionManager>,
    metrics: GatewayMetrics,
    active: Arc<DashMap<RequestId, ActiveRequest>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("config", &self.config)
            .field("providers", &self.providers.names())
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl RequestOrchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> RequestOrchestratorBuilder {
        RequestOrchestratorBuilder::default()
    }

    /// Settings
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Session manager streamed chunks are delivered through
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Number of in-flight requests
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    /// Register `request_id` as in flight.
    ///
    /// # Errors
    /// Returns `Validation` with code `duplicate_request` when the id is
    /// already in flight
    pub fn register(&self, request_id: &RequestId) -> GatewayResult<ActiveHandle> {
        match self.active.entry(request_id.clone()) {
            Entry::Occupied(_) => Err(GatewayError::validation(
                format!("request {request_id} is already in flight"),
                Some("id".to_string()),
                "duplicate_request",
            )),
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                let (pause, paused) = watch::channel(false);
                slot.insert(ActiveRequest {
                    generation,
                    token: token.clone(),
                    pause,
                });
                Ok(ActiveHandle {
                    request_id: request_id.clone(),
                    generation,
                    token,
                    paused,
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    /// Run a request to completion.
    ///
    /// Streamed requests must carry a session id; their chunks go to that
    /// session and the returned response is the accumulated whole. A
    /// cancelled stream resolves to the partial response with finish reason
    /// `cancelled`.
    ///
    /// # Errors
    /// Returns the first failure along the pipeline, classified by kind
    pub async fn process_request(&self, request: ChatRequest) -> GatewayResult<UnifiedResponse> {
        let handle = self.register(&request.id)?;
        self.process_registered(request, handle).await
    }

    /// Run a request whose id was already registered with [`Self::register`]
    ///
    /// # Errors
    /// See [`Self::process_request`]
    pub async fn process_registered(
        &self,
        request: ChatRequest,
        mut handle: ActiveHandle,
    ) -> GatewayResult<UnifiedResponse> {
        let started = Instant::now();
        let mode = if request.stream {
            RequestMode::Streaming
        } else {
            RequestMode::Buffered
        };
        let provider_label = ModelTarget::resolve(&request.model, self.config.default_provider.as_deref())
            .map_or_else(|| "unknown".to_string(), |t| t.provider);
        let span = request_span!(request.id, provider_label, request.model);

        let result = self.run(request, &mut handle).instrument(span).await;

        let outcome = match &result {
            Ok(response) if response.content.finish_reason == Some(FinishReason::Cancelled) => {
                "cancelled"
            }
            Ok(_) => "ok",
            Err(error) => error.kind().as_str(),
        };
        self.metrics
            .record_request(&provider_label, mode, outcome, started.elapsed());
        result
    }

    async fn run(
        &self,
        request: ChatRequest,
        handle: &mut ActiveHandle,
    ) -> GatewayResult<UnifiedResponse> {
        request.validate()?;
        let resolved = self.resolve(&request).await?;

        let mut upstream = request.clone();
        upstream.model = resolved.target.model.clone();

        if request.stream {
            self.run_streaming(upstream, &resolved, handle).await
        } else {
            self.run_buffered(&request, upstream, &resolved, handle).await
        }
    }

    /// Steps that precede any upstream traffic
    async fn resolve(&self, request: &ChatRequest) -> GatewayResult<Resolved> {
        let target = ModelTarget::resolve(&request.model, self.config.default_provider.as_deref())
            .ok_or_else(|| {
                GatewayError::validation(
                    format!("cannot resolve a provider for model '{}'", request.model),
                    Some("model".to_string()),
                    "unknown_provider",
                )
            })?;

        let entry = self.providers.get(&target.provider).ok_or_else(|| {
            GatewayError::validation(
                format!("provider '{}' is not configured", target.provider),
                Some("model".to_string()),
                "unknown_provider",
            )
        })?;

        let qualified = target.qualified();
        if let Err(error) =
            self.rate_limits
                .admit(&target.provider, &qualified, request.user.as_deref())
        {
            if let GatewayError::RateLimited { scope, .. } = &error {
                self.metrics.rate_limited(scope);
            }
            return Err(error);
        }

        let descriptor = self
            .catalog
            .describe(&target.provider, &target.model)
            .await
            .ok_or_else(|| {
                GatewayError::validation(
                    format!("model '{qualified}' is not in the catalog"),
                    Some("model".to_string()),
                    "model_not_found",
                )
            })?;
        descriptor.capabilities.check(
            &qualified,
            request.requested_capabilities(),
            request.estimated_prompt_tokens(),
        )?;

        let options = NormalizeOptions::new(&target.provider, &target.model)
            .with_reasoning(request.reasoning.as_ref());
        Ok(Resolved {
            breaker: self.breakers.get_or_create(&target.provider),
            pricing: descriptor.pricing,
            target,
            entry,
            options,
        })
    }

    async fn run_buffered(
        &self,
        request: &ChatRequest,
        upstream: ChatRequest,
        resolved: &Resolved,
        handle: &ActiveHandle,
    ) -> GatewayResult<UnifiedResponse> {
        let key = self
            .config
            .cache_enabled
            .then(|| cache_key(&resolved.target, request));

        if let Some(key) = &key {
            if let Some(mut cached) = self.cache.get::<UnifiedResponse>(key).await {
                self.metrics.cache_hit();
                cached.metadata.cached = true;
                debug!(key = %key, "Serving cached response");
                return Ok(cached);
            }
            self.metrics.cache_miss();
        }

        let provider = &resolved.entry.provider;
        let breaker = &resolved.breaker;
        let upstream = &upstream;
        let call = self
            .retry
            .execute(|| async move { breaker.call(|| provider.complete(upstream)).await });

        let timeout = self.config.request_timeout;
        let raw = tokio::select! {
            biased;
            () = handle.token.cancelled() => return Err(GatewayError::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.map_err(|_| GatewayError::timeout(timeout))??
            }
        };

        let mut response = resolved.entry.adapter.normalize(raw, &resolved.options)?;
        price(&mut response.usage, &resolved.pricing);

        if let Some(key) = &key {
            self.cache.set_default(key, &response).await;
        }
        self.metrics
            .record_usage(&resolved.target.provider, &response.usage);
        info!(
            finish_reason = ?response.content.finish_reason,
            total_tokens = response.usage.total_tokens,
            "Request completed"
        );
        Ok(response)
    }

    async fn run_streaming(
        &self,
        upstream: ChatRequest,
        resolved: &Resolved,
        handle: &mut ActiveHandle,
    ) -> GatewayResult<UnifiedResponse> {
        let session_id = upstream.session_id.clone().ok_or_else(|| {
            GatewayError::validation(
                "streaming requires a session",
                Some("stream".to_string()),
                "session_required",
            )
        })?;
        let request_id = upstream.id.clone();
        let _stream_gauge = self.metrics.track_stream();

        let mut acc = StreamAccumulator::new(resolved.options.clone());
        let breaker = &resolved.breaker;
        let timeout = self.config.request_timeout;

        // Upstream errors surface as stream items, so the breaker verdict
        // waits for the first item or a clean end.
        let mut permit = Some(breaker.permit()?);
        let open = resolved.entry.provider.stream(&upstream);

        let opened = tokio::select! {
            biased;
            () = handle.token.cancelled() => return Ok(acc.finish(Some(FinishReason::Cancelled))),
            opened = tokio::time::timeout(timeout, open) => {
                opened.map_err(|_| GatewayError::timeout(timeout)).and_then(|r| r)
            }
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                settle_failure(breaker, &mut permit, &error);
                return Err(error);
            }
        };

        let stall = self.config.stream_stall_timeout;
        loop {
            if *handle.paused.borrow_and_update() {
                debug!(request_id = %request_id, "Stream paused");
                tokio::select! {
                    biased;
                    () = handle.token.cancelled() => break,
                    changed = handle.paused.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let next = tokio::select! {
                biased;
                () = handle.token.cancelled() => break,
                changed = handle.paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = tokio::time::timeout(stall, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    warn!(request_id = %request_id, stall_ms = stall.as_millis() as u64, "Upstream stream stalled");
                    let error = GatewayError::timeout(stall);
                    settle_failure(breaker, &mut permit, &error);
                    return Err(error);
                }
                Ok(None) => {
                    if let Some(permit) = permit.take() {
                        permit.success();
                    }
                    let mut response = acc.finish(None);
                    if response.usage.prompt_tokens == 0 {
                        response.usage.prompt_tokens = upstream.estimated_prompt_tokens();
                        response.usage.total_tokens =
                            response.usage.prompt_tokens + response.usage.completion_tokens;
                    }
                    price(&mut response.usage, &resolved.pricing);
                    self.metrics
                        .record_usage(&resolved.target.provider, &response.usage);
                    info!(
                        request_id = %request_id,
                        finish_reason = ?response.content.finish_reason,
                        total_tokens = response.usage.total_tokens,
                        "Stream completed"
                    );
                    return Ok(response);
                }
                Ok(Some(Err(error))) => {
                    warn!(request_id = %request_id, error = %error, "Upstream stream failed");
                    settle_failure(breaker, &mut permit, &error);
                    return Err(error);
                }
                Ok(Some(Ok(raw))) => {
                    if let Some(permit) = permit.take() {
                        permit.success();
                    }
                    let chunk = resolved.entry.adapter.normalize_chunk(raw, &resolved.options);
                    for frame in acc.absorb(chunk) {
                        let delivered = self.sessions.send(
                            &session_id,
                            ServerMessage::StreamChunk {
                                request_id: request_id.clone(),
                                chunk: frame,
                            },
                        );
                        if !delivered {
                            debug!(request_id = %request_id, "Session gone, abandoning stream");
                            return Err(GatewayError::Cancelled);
                        }
                    }
                }
            }
        }

        info!(request_id = %request_id, "Stream cancelled");
        Ok(acc.finish(Some(FinishReason::Cancelled)))
    }

    /// Cancel an in-flight request and forget it; false if it is not in
    /// flight or was already cancelled
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.active.remove(request_id).map_or(false, |(_, active)| {
            active.token.cancel();
            true
        })
    }

    /// Suspend forwarding for a streamed request
    pub fn pause(&self, request_id: &RequestId) -> bool {
        self.set_paused(request_id, true)
    }

    /// Continue forwarding for a paused request
    pub fn resume(&self, request_id: &RequestId) -> bool {
        self.set_paused(request_id, false)
    }

    fn set_paused(&self, request_id: &RequestId, paused: bool) -> bool {
        self.active.get(request_id).map_or(false, |active| {
            active.pause.send_replace(paused);
            true
        })
    }

    /// Cancel everything in flight
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for active in self.active.iter() {
            active.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Empty response for a request cancelled before producing anything
    #[must_use]
    pub fn cancelled_response(&self, request: &ChatRequest) -> UnifiedResponse {
        let options = ModelTarget::resolve(&request.model, self.config.default_provider.as_deref())
            .map_or_else(
                || NormalizeOptions::new("unknown", &request.model),
                |t| NormalizeOptions::new(t.provider, t.model),
            )
            .with_reasoning(request.reasoning.as_ref());
        StreamAccumulator::new(options).finish(Some(FinishReason::Cancelled))
    }
}

/// Report a stream failure: through the pending permit if the stream has not
/// produced anything yet, otherwise as a plain failure
fn settle_failure(
    breaker: &CircuitBreaker,
    permit: &mut Option<BreakerPermit<'_>>,
    error: &GatewayError,
) {
    match permit.take() {
        Some(permit) => permit.failure(error),
        None if error.counts_as_failure() => breaker.record_failure(),
        None => {}
    }
}

/// Fill in cost from catalog prices when the provider did not report one
fn price(usage: &mut UnifiedUsage, pricing: &Pricing) {
    if usage.cost.is_none() && *pricing != Pricing::default() {
        usage.cost = Some(pricing.cost(usage));
    }
}

/// Builder for [`RequestOrchestrator`]
#[derive(Default)]
pub struct RequestOrchestratorBuilder {
    config: OrchestratorConfig,
    providers: Option<Arc<ProviderRegistry>>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    retry: Option<RetryPolicy>,
    rate_limits: Option<Arc<gateway_resilience::RateLimitService>>,
    cache: Option<Arc<CacheService>>,
    sessions: Option<Arc<SessionManager>>,
    metrics: Option<GatewayMetrics>,
}

impl RequestOrchestratorBuilder {
    /// Settings
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Provider registry
    #[must_use]
    pub fn providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Model catalog
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Circuit breakers
    #[must_use]
    pub fn breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Retry policy for buffered calls
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Admission control
    #[must_use]
    pub fn rate_limits(mut self, rate_limits: Arc<gateway_resilience::RateLimitService>) -> Self {
        self.rate_limits = Some(rate_limits);
        self
    }

    /// Response cache
    #[must_use]
    pub fn cache(mut self, cache: Arc<CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Session manager
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Metrics
    #[must_use]
    pub fn metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the orchestrator.
    ///
    /// Providers, sessions, breakers, rate limits, cache and metrics are
    /// required; the catalog defaults to empty and retries to the default
    /// policy.
    ///
    /// # Errors
    /// Returns `Configuration` naming the first missing component
    pub fn build(self) -> GatewayResult<RequestOrchestrator> {
        fn missing(component: &str) -> GatewayError {
            GatewayError::Configuration {
                message: format!("orchestrator requires {component}"),
            }
        }

        Ok(RequestOrchestrator {
            config: self.config,
            providers: self.providers.ok_or_else(|| missing("a provider registry"))?,
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(StaticModelCatalog::new())),
            breakers: self.breakers.ok_or_else(|| missing("circuit breakers"))?,
            retry: self.retry.unwrap_or_else(RetryPolicy::with_defaults),
            rate_limits: self.rate_limits.ok_or_else(|| missing("rate limits"))?,
            cache: self.cache.ok_or_else(|| missing("a cache"))?,
            sessions: self.sessions.ok_or_else(|| missing("a session manager"))?,
            metrics: self.metrics.ok_or_else(|| missing("metrics"))?,
            active: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        })
    }
}
