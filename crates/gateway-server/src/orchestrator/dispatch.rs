//! Session event dispatch.
//!
//! Bridges [`SessionEvent`]s to the orchestrator. Registration happens on the
//! dispatcher task, in event order, so a `stop` that follows an `ai_request`
//! always finds the request it targets.

use super::{ActiveHandle, RequestOrchestrator};
use crate::session::protocol::{ServerMessage, StreamAction};
use crate::session::{SessionEvent, SessionEvents};
use gateway_core::{ChatRequest, GatewayError, SessionId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consume session events until shutdown or until the channel closes.
///
/// Everything still in flight is cancelled on exit.
pub fn spawn_dispatcher(
    orchestrator: Arc<RequestOrchestrator>,
    mut events: SessionEvents,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            orchestrator.handle_event(event);
        }

        let cancelled = orchestrator.cancel_all();
        info!(cancelled, "Session dispatcher stopped");
    })
}

impl RequestOrchestrator {
    /// Act on one session event
    pub fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::AiRequest {
                session_id,
                request,
            } => match self.register(&request.id) {
                Ok(handle) => {
                    tokio::spawn(Arc::clone(self).serve_session_request(
                        session_id,
                        *request,
                        handle,
                    ));
                }
                Err(error) => {
                    self.sessions.unbind_request(&request.id);
                    self.sessions.send(
                        &session_id,
                        ServerMessage::request_error(request.id.clone(), &error),
                    );
                }
            },
            SessionEvent::StreamControl {
                session_id,
                request_id,
                action,
            } => {
                // A session may only steer its own request.
                let owned = self.sessions.session_for_request(&request_id).as_ref() == Some(&session_id);
                let applied = owned
                    && match action {
                        StreamAction::Stop => self.cancel(&request_id),
                        StreamAction::Pause => self.pause(&request_id),
                        StreamAction::Resume => self.resume(&request_id),
                    };
                if applied {
                    debug!(session_id = %session_id, request_id = %request_id, ?action, "Stream control applied");
                } else {
                    warn!(session_id = %session_id, request_id = %request_id, ?action, "Stream control for unknown request");
                    let error = GatewayError::validation(
                        format!("request {request_id} is not in flight"),
                        Some("requestId".to_string()),
                        "no_active_request",
                    );
                    self.sessions
                        .send(&session_id, ServerMessage::request_error(request_id, &error));
                }
            }
            SessionEvent::SessionClosed {
                session_id,
                request_id,
            } => {
                if let Some(request_id) = request_id {
                    if self.cancel(&request_id) {
                        debug!(session_id = %session_id, request_id = %request_id, "Cancelled request of closed session");
                    }
                }
            }
        }
    }

    /// Run a session request and send its single terminal message
    async fn serve_session_request(
        self: Arc<Self>,
        session_id: SessionId,
        request: ChatRequest,
        handle: ActiveHandle,
    ) {
        let request_id = request.id.clone();
        let fallback = self.cancelled_response(&request);

        let message = match self.process_registered(request, handle).await {
            Ok(response) => ServerMessage::StreamComplete {
                request_id: request_id.clone(),
                completion: Box::new(response),
            },
            Err(GatewayError::Cancelled) => ServerMessage::StreamComplete {
                request_id: request_id.clone(),
                completion: Box::new(fallback),
            },
            Err(error) => ServerMessage::request_error(request_id.clone(), &error),
        };

        // Free the session before the client sees the terminal message, so
        // it may send its next request right away.
        self.sessions.unbind_request(&request_id);
        if !self.sessions.send(&session_id, message) {
            debug!(session_id = %session_id, request_id = %request_id, "Session gone before completion");
        }
    }
}
