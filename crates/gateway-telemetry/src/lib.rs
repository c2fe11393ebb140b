//! # Gateway Telemetry
//!
//! Observability for the LLM Chat Gateway.
//!
//! This crate provides:
//! - Structured logging through `tracing-subscriber`
//! - Prometheus metrics for requests, cache, admission, tokens and live
//!   streams/sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

// Re-export main types
pub use logging::{init_logging, LogFormat, LoggingConfig, TelemetryError};
pub use metrics::{GatewayMetrics, GaugeGuard, RequestMode};
