//! Shared application state.

use crate::orchestrator::{dispatch, OrchestratorConfig, RequestOrchestrator};
use crate::session::{SessionConfig, SessionEvents, SessionManager};
use gateway_config::GatewayConfig;
use gateway_core::{system_clock, GatewayError, GatewayResult, ModelCatalog, SharedClock};
use gateway_providers::{ChatProvider, OpenAiCompatProvider, ProviderRegistry};
use gateway_resilience::{
    CacheService, CircuitBreakerRegistry, RateLimitService, RetryPolicy,
};
use gateway_telemetry::GatewayMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const RATE_LIMIT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Request pipeline
    pub orchestrator: Arc<RequestOrchestrator>,
    /// Live sessions
    pub sessions: Arc<SessionManager>,
    /// Registered providers
    pub providers: Arc<ProviderRegistry>,
    /// Per-provider circuit breakers
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Admission control
    pub rate_limits: Arc<RateLimitService>,
    /// Metrics registry
    pub metrics: GatewayMetrics,
    /// Session cap; upgrades beyond it are refused
    pub max_sessions: usize,
    /// Process start
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Start building state
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// Start the dispatcher, session maintenance and rate-limit purging.
    ///
    /// All tasks stop when `shutdown` is cancelled.
    pub fn spawn_background(
        &self,
        events: SessionEvents,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let dispatcher =
            dispatch::spawn_dispatcher(Arc::clone(&self.orchestrator), events, shutdown.clone());
        let maintenance = Arc::clone(&self.sessions).spawn_maintenance(shutdown.clone());

        let rate_limits = Arc::clone(&self.rate_limits);
        let token = shutdown.clone();
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_PURGE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = rate_limits.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired rate-limit windows");
                        }
                    }
                }
            }
        });

        vec![dispatcher, maintenance, purge]
    }
}

/// Build one client per enabled provider
///
/// # Errors
/// Returns an error if a client cannot be created or a name repeats
pub fn build_provider_registry(config: &GatewayConfig) -> GatewayResult<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    for settings in config.enabled_providers() {
        let provider = OpenAiCompatProvider::new(settings.to_client_config())?;
        registry.register_with_adapter(
            Arc::new(provider) as Arc<dyn ChatProvider>,
            settings.adapter(),
        )?;
    }
    info!(providers = ?registry.names(), "Providers registered");
    Ok(registry)
}

/// Builder for [`AppState`]
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<GatewayConfig>,
    providers: Option<ProviderRegistry>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    clock: Option<SharedClock>,
    metrics: Option<GatewayMetrics>,
}

impl AppStateBuilder {
    /// Gateway configuration
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use these providers instead of building clients from the config
    #[must_use]
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Use this catalog instead of the config's model list
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Time source for breakers, limits, cache and sessions
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Metrics registry
    #[must_use]
    pub fn metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire everything together. The returned events feed
    /// [`AppState::spawn_background`].
    ///
    /// # Errors
    /// Returns an error if a provider client or the metrics registry cannot
    /// be created
    pub fn build(self) -> GatewayResult<(AppState, SessionEvents)> {
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(system_clock);
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => GatewayMetrics::new().map_err(|e| GatewayError::Configuration {
                message: format!("metrics: {e}"),
            })?,
        };

        let providers = Arc::new(match self.providers {
            Some(providers) => providers,
            None => build_provider_registry(&config)?,
        });
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(config.catalog()) as Arc<dyn ModelCatalog>);

        let resilience = &config.resilience;
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            resilience.circuit_breaker.to_breaker_config(),
            Arc::clone(&clock),
        ));
        let rate_limits = Arc::new(RateLimitService::new(
            resilience.rate_limits.to_rate_limit_config(),
            Arc::clone(&clock),
        ));
        let cache = Arc::new(CacheService::in_memory(
            resilience.cache.max_entries,
            resilience.cache.ttl,
            Arc::clone(&clock),
        ));

        let (sessions, events) = SessionManager::new(
            SessionConfig {
                heartbeat_interval: config.session.heartbeat_interval,
                idle_timeout: config.session.idle_timeout,
                sweep_interval: config.session.sweep_interval,
            },
            Arc::clone(&clock),
            metrics.clone(),
        );
        let sessions = Arc::new(sessions);

        let orchestrator = RequestOrchestrator::builder()
            .config(OrchestratorConfig {
                request_timeout: config.timeouts.request,
                stream_stall_timeout: config.timeouts.stream_stall,
                cache_enabled: resilience.cache.enabled,
                default_provider: config.default_provider.clone(),
            })
            .providers(Arc::clone(&providers))
            .catalog(catalog)
            .breakers(Arc::clone(&breakers))
            .retry(RetryPolicy::new(resilience.retry.to_retry_config()))
            .rate_limits(Arc::clone(&rate_limits))
            .cache(cache)
            .sessions(Arc::clone(&sessions))
            .metrics(metrics.clone())
            .build()?;

        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            sessions,
            providers,
            breakers,
            rate_limits,
            metrics,
            max_sessions: config.server.max_sessions,
            started_at: Instant::now(),
        };
        Ok((state, events))
    }
}
