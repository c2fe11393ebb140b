//! Server lifecycle.

use crate::routes::create_router;
use crate::state::AppState;
use crate::session::SessionEvents;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Server startup or runtime failure
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listener
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Time allowed for background tasks to stop after shutdown
    pub shutdown_grace: Duration,
}

/// The gateway HTTP/WebSocket server
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
    events: SessionEvents,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a server around built state
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState, events: SessionEvents) -> Self {
        Self {
            config,
            state,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve until a shutdown signal arrives or the token is cancelled.
    ///
    /// On shutdown every session is closed and in-flight requests are
    /// cancelled.
    ///
    /// # Errors
    /// Returns an error if binding or serving fails
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            config,
            state,
            events,
            shutdown,
        } = self;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        info!(addr = %config.bind_addr, "Gateway listening");

        let background = state.spawn_background(events, &shutdown);
        let sessions = Arc::clone(&state.sessions);
        let app = create_router(state);

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                name = shutdown_signal() => info!(signal = name, "Shutting down"),
                () = signal_token.cancelled() => {}
            }
            // Sessions hold their sockets open; close them so the server can drain.
            sessions.close_all("Server shutting down");
            signal_token.cancel();
        });

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

        shutdown.cancel();
        let drain = futures::future::join_all(background);
        if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
            warn!("Background tasks did not stop within the grace period");
        }

        served.map_err(|e| {
            error!(error = %e, "Server stopped with error");
            ServerError::Serve(e)
        })?;
        info!("Gateway stopped");
        Ok(())
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM/SIGQUIT
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "ctrl+c"
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate(), "sigterm");
    #[cfg(unix)]
    let quit = unix_signal(signal::unix::SignalKind::quit(), "sigquit");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
        name = quit => name,
    }
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) -> &'static str {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!(error = %e, signal = name, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
    name
}
