//! # Gateway Server
//!
//! HTTP and WebSocket server for the LLM Chat Gateway.
//!
//! This crate provides:
//! - The request orchestrator: admission, catalog checks, caching, circuit
//!   breaking, retries and normalization for every chat request
//! - Streaming sessions over WebSocket with heartbeats, idle sweeps and
//!   stop/pause/resume control
//! - Axum routes for buffered completions, health and metrics
//! - Graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

// Re-export main types
pub use error::{ApiError, ApiResult};
pub use orchestrator::{OrchestratorConfig, RequestOrchestrator, RequestOrchestratorBuilder};
pub use routes::create_router;
pub use server::{Server, ServerConfig, ServerError};
pub use session::{SessionConfig, SessionEvent, SessionEvents, SessionManager, SessionMetadata};
pub use state::{build_provider_registry, AppState, AppStateBuilder};
