//! WebSocket transport for streaming sessions.
//!
//! `GET /v1/ws` upgrades to a text WebSocket carrying the session protocol.
//! Each connection runs two tasks:
//!
//! * ingest reads frames and hands text to the [`SessionManager`]
//! * egress drains the session's transport channel into the socket
//!
//! Whichever ends first closes the session and aborts the other.
//!
//! [`SessionManager`]: crate::session::SessionManager

use crate::session::transport::{self, TransportFrame};
use crate::session::SessionMetadata;
use crate::state::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EGRESS_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Upgrade query parameters
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// End user the session acts for
    #[serde(default)]
    pub user: Option<String>,
}

/// `GET /v1/ws`
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    if state.sessions.session_count() >= state.max_sessions {
        warn!(max_sessions = state.max_sessions, "Session limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "session limit reached").into_response();
    }

    let metadata = SessionMetadata::new(params.user, remote.map(|ConnectInfo(addr)| addr));
    ws.on_upgrade(move |socket| handle_session(socket, state, metadata))
}

async fn handle_session(socket: WebSocket, state: AppState, metadata: SessionMetadata) {
    let (tx, mut rx) = transport::channel();
    let sessions = state.sessions;
    let session_id = sessions.create_session(tx, metadata);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut egress = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                TransportFrame::Text(text) => Message::Text(text),
                TransportFrame::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let ingest_sessions = Arc::clone(&sessions);
    let ingest_id = session_id.clone();
    let mut ingest = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => ingest_sessions.handle_message(&ingest_id, &text),
                Ok(Message::Pong(_)) => ingest_sessions.touch_heartbeat(&ingest_id),
                Ok(Message::Binary(_)) => {
                    debug!(session_id = %ingest_id, "Ignoring binary frame");
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(Message::Ping(_)) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut ingest => {}
        _ = &mut egress => { ingest.abort(); }
    }

    // Queues session_closed and the close frame when the client went away
    // first; a no-op when the server closed the session.
    sessions.close_session(&session_id, "Connection closed");

    // Let egress flush the closing frames, then give up.
    if !egress.is_finished()
        && tokio::time::timeout(EGRESS_FLUSH_TIMEOUT, &mut egress)
            .await
            .is_err()
    {
        egress.abort();
    }
}
