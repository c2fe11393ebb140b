//! Prometheus metrics.
//!
//! [`GatewayMetrics`] owns its own registry so independent gateway instances
//! (and tests) never share counters.

use crate::logging::TelemetryError;
use gateway_core::UnifiedUsage;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Delivery mode label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Single buffered response
    Buffered,
    /// Streamed over a session
    Streaming,
}

impl RequestMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Streaming => "streaming",
        }
    }
}

/// Gateway metrics
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    rate_limited: IntCounterVec,
    tokens: IntCounterVec,
    cost: CounterVec,
    active_streams: IntGauge,
    active_sessions: IntGauge,
}

impl GatewayMetrics {
    /// Create and register every metric
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new_custom(Some("gateway".to_string()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Chat requests by provider, mode and outcome"),
            &["provider", "mode", "outcome"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "End-to-end request latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider", "mode"],
        )?;
        let cache_hits = IntCounter::new("cache_hits_total", "Response cache hits")?;
        let cache_misses = IntCounter::new("cache_misses_total", "Response cache misses")?;
        let rate_limited = IntCounterVec::new(
            Opts::new("rate_limited_total", "Admission denials by keyspace"),
            &["keyspace"],
        )?;
        let tokens = IntCounterVec::new(
            Opts::new("tokens_total", "Tokens by provider and kind"),
            &["provider", "kind"],
        )?;
        let cost = CounterVec::new(
            Opts::new("cost_usd_total", "Accumulated cost in USD"),
            &["provider"],
        )?;
        let active_streams = IntGauge::new("active_streams", "Upstream streams in flight")?;
        let active_sessions = IntGauge::new("active_sessions", "Open client sessions")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(tokens.clone()))?;
        registry.register(Box::new(cost.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            requests,
            latency,
            cache_hits,
            cache_misses,
            rate_limited,
            tokens,
            cost,
            active_streams,
            active_sessions,
        })
    }

    /// Record a finished request. `outcome` is `ok`, `cancelled` or an
    /// error-kind name.
    pub fn record_request(&self, provider: &str, mode: RequestMode, outcome: &str, elapsed: Duration) {
        self.requests
            .with_label_values(&[provider, mode.as_str(), outcome])
            .inc();
        self.latency
            .with_label_values(&[provider, mode.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Record token usage and cost
    pub fn record_usage(&self, provider: &str, usage: &UnifiedUsage) {
        for (kind, count) in [
            ("prompt", usage.prompt_tokens),
            ("completion", usage.completion_tokens),
            ("reasoning", usage.reasoning_tokens),
        ] {
            if count > 0 {
                self.tokens
                    .with_label_values(&[provider, kind])
                    .inc_by(u64::from(count));
            }
        }
        if let Some(cost) = usage.cost.filter(|c| *c > 0.0) {
            self.cost.with_label_values(&[provider]).inc_by(cost);
        }
    }

    /// Count a cache hit
    pub fn cache_hit(&self) {
        self.cache_hits.inc();
    }

    /// Count a cache miss
    pub fn cache_miss(&self) {
        self.cache_misses.inc();
    }

    /// Count an admission denial; `scope` is the limited key, e.g. `user:u1`
    pub fn rate_limited(&self, scope: &str) {
        let keyspace = scope.split(':').next().unwrap_or(scope);
        self.rate_limited.with_label_values(&[keyspace]).inc();
    }

    /// Count an upstream stream until the guard drops
    #[must_use]
    pub fn track_stream(&self) -> GaugeGuard {
        GaugeGuard::new(self.active_streams.clone())
    }

    /// Count an open session until the guard drops
    #[must_use]
    pub fn track_session(&self) -> GaugeGuard {
        GaugeGuard::new(self.active_sessions.clone())
    }

    /// Streams in flight
    #[must_use]
    pub fn active_streams(&self) -> i64 {
        self.active_streams.get()
    }

    /// Sessions open
    #[must_use]
    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    /// Render the text exposition format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn gather(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TelemetryError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics")
            .field("active_streams", &self.active_streams.get())
            .field("active_sessions", &self.active_sessions.get())
            .finish_non_exhaustive()
    }
}

/// Increments a gauge on creation and decrements it on drop
#[derive(Debug)]
pub struct GaugeGuard {
    gauge: IntGauge,
}

impl GaugeGuard {
    fn new(gauge: IntGauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_guards() {
        let metrics = GatewayMetrics::new().expect("metrics");
        let stream = metrics.track_stream();
        let _session = metrics.track_session();
        assert_eq!(metrics.active_streams(), 1);
        assert_eq!(metrics.active_sessions(), 1);

        drop(stream);
        assert_eq!(metrics.active_streams(), 0);
        assert_eq!(metrics.active_sessions(), 1);
    }

    #[test]
    fn test_gather_exposes_prefixed_metrics() {
        let metrics = GatewayMetrics::new().expect("metrics");
        metrics.record_request("openai", RequestMode::Buffered, "ok", Duration::from_millis(120));
        metrics.record_usage(
            "openai",
            &UnifiedUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                reasoning_tokens: 0,
                total_tokens: 15,
                cost: Some(0.002),
            },
        );
        metrics.cache_miss();
        metrics.rate_limited("user:u1");

        let text = metrics.gather().expect("gather");
        assert!(text.contains(
            r#"gateway_requests_total{mode="buffered",outcome="ok",provider="openai"} 1"#
        ));
        assert!(text.contains(r#"gateway_tokens_total{kind="prompt",provider="openai"} 10"#));
        assert!(!text.contains(r#"kind="reasoning""#));
        assert!(text.contains(r#"gateway_rate_limited_total{keyspace="user"} 1"#));
        assert!(text.contains("gateway_cache_misses_total 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = GatewayMetrics::new().expect("metrics");
        let b = GatewayMetrics::new().expect("metrics");
        a.cache_hit();
        assert!(b.gather().expect("gather").contains("gateway_cache_hits_total 0"));
    }
}
