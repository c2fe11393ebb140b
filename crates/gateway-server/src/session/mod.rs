//! Streaming session management.
//!
//! A session is one live duplex connection. The [`SessionManager`] owns the
//! session table, parses inbound frames, keeps heartbeats and idle timers,
//! and hands work to the orchestrator as [`SessionEvent`]s over a channel.
//! It never writes to a socket directly; see [`transport`].

pub mod protocol;
pub mod transport;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{ChatRequest, GatewayError, RequestId, SessionId, SharedClock};
use gateway_telemetry::{GatewayMetrics, GaugeGuard};
use protocol::{parse_client_message, ClientMessage, ServerMessage, StreamAction};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use transport::{TransportFrame, TransportSender, NORMAL_CLOSURE};

/// Session timers
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server ping interval; two silent intervals close the session
    pub heartbeat_interval: Duration,
    /// Inactivity before the sweep closes a session
    pub idle_timeout: Duration,
    /// How often idle sessions are swept
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Connection details captured at upgrade time
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    /// End user, if the client identified one
    pub user_id: Option<String>,
    /// Peer address
    pub remote_addr: Option<SocketAddr>,
    /// Upgrade time
    pub connected_at: DateTime<Utc>,
}

impl SessionMetadata {
    /// Metadata stamped with the current time
    #[must_use]
    pub fn new(user_id: Option<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            user_id,
            remote_addr,
            connected_at: Utc::now(),
        }
    }
}

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Registered, `connected` not yet sent
    Connecting,
    /// Accepting messages
    Active,
    /// Closed; the record is about to be dropped
    Closed,
}

/// Work handed to the orchestrator
#[derive(Debug)]
pub enum SessionEvent {
    /// A request was accepted and bound to the session
    AiRequest {
        /// Origin session
        session_id: SessionId,
        /// The request, with `session_id` set
        request: Box<ChatRequest>,
    },
    /// Stop, pause or resume a request
    StreamControl {
        /// Origin session
        session_id: SessionId,
        /// Target request
        request_id: RequestId,
        /// What to do
        action: StreamAction,
    },
    /// The session is gone
    SessionClosed {
        /// Closed session
        session_id: SessionId,
        /// Request that was bound at close time
        request_id: Option<RequestId>,
    },
}

/// Receiving side of the event channel
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug)]
struct Session {
    transport: TransportSender,
    metadata: SessionMetadata,
    last_activity: u64,
    last_seen: u64,
    request_id: Option<RequestId>,
    phase: SessionPhase,
    _gauge: GaugeGuard,
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Session id
    pub id: SessionId,
    /// End user
    pub user_id: Option<String>,
    /// Upgrade time
    pub connected_at: DateTime<Utc>,
    /// Bound request
    pub request_id: Option<RequestId>,
    /// Phase
    pub phase: SessionPhase,
}

/// Registry of live sessions
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    clock: SharedClock,
    metrics: GatewayMetrics,
    sessions: DashMap<SessionId, Session>,
    requests: DashMap<RequestId, SessionId>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager and the event stream the orchestrator consumes
    #[must_use]
    pub fn new(
        config: SessionConfig,
        clock: SharedClock,
        metrics: GatewayMetrics,
    ) -> (Self, SessionEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            clock,
            metrics,
            sessions: DashMap::new(),
            requests: DashMap::new(),
            events,
        };
        (manager, rx)
    }

    /// Timer configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a connection and send `connected`
    pub fn create_session(
        &self,
        transport: TransportSender,
        metadata: SessionMetadata,
    ) -> SessionId {
        let id = SessionId::generate();
        let now = self.clock.now_millis();

        info!(
            session_id = %id,
            user_id = ?metadata.user_id,
            remote_addr = ?metadata.remote_addr,
            "Session opened"
        );

        self.sessions.insert(
            id.clone(),
            Session {
                transport,
                metadata,
                last_activity: now,
                last_seen: now,
                request_id: None,
                phase: SessionPhase::Connecting,
                _gauge: self.metrics.track_session(),
            },
        );

        self.send(
            &id,
            ServerMessage::Connected {
                session_id: id.clone(),
                heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
            },
        );
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.phase = SessionPhase::Active;
        }
        id
    }

    /// Handle one inbound text frame.
    ///
    /// Protocol problems are answered with an `error` message; the session
    /// stays open.
    pub fn handle_message(&self, session_id: &SessionId, text: &str) {
        let now = self.clock.now_millis();
        let user_id = {
            let Some(mut session) = self.sessions.get_mut(session_id) else {
                debug!(session_id = %session_id, "Message for unknown session");
                return;
            };
            session.last_activity = now;
            session.last_seen = now;
            session.metadata.user_id.clone()
        };

        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Rejected session message");
                self.send(
                    session_id,
                    ServerMessage::Error {
                        request_id: None,
                        error: e.to_payload(),
                    },
                );
                return;
            }
        };

        match message {
            ClientMessage::AiRequest {
                request_id,
                mut request,
            } => {
                if let Some(id) = request_id {
                    request.id = id;
                }
                if request.user.is_none() {
                    request.user = user_id;
                }
                request.session_id = Some(session_id.clone());
                self.accept_request(session_id, request);
            }
            ClientMessage::StreamControl { request_id, action } => {
                let target = request_id.or_else(|| {
                    self.sessions
                        .get(session_id)
                        .and_then(|s| s.request_id.clone())
                });
                let Some(request_id) = target else {
                    self.send(
                        session_id,
                        ServerMessage::Error {
                            request_id: None,
                            error: GatewayError::validation(
                                "no active request to control",
                                Some("requestId".to_string()),
                                "no_active_request",
                            )
                            .to_payload(),
                        },
                    );
                    return;
                };
                debug!(session_id = %session_id, request_id = %request_id, ?action, "Stream control");
                self.emit(SessionEvent::StreamControl {
                    session_id: session_id.clone(),
                    request_id,
                    action,
                });
            }
            ClientMessage::Ping => {
                self.send(session_id, ServerMessage::Pong { timestamp: now });
            }
            ClientMessage::Pong => {}
        }
    }

    fn accept_request(&self, session_id: &SessionId, request: Box<ChatRequest>) {
        let request_id = request.id.clone();

        let busy = {
            let Some(mut session) = self.sessions.get_mut(session_id) else {
                return;
            };
            if session.request_id.is_some() {
                Some("session already has an active request")
            } else if self.requests.contains_key(&request_id) {
                Some("request id is already active")
            } else {
                session.request_id = Some(request_id.clone());
                self.requests.insert(request_id.clone(), session_id.clone());
                None
            }
        };

        if let Some(reason) = busy {
            warn!(session_id = %session_id, request_id = %request_id, reason, "Request rejected");
            let error = GatewayError::validation(reason, Some("requestId".to_string()), "session_busy");
            self.send(session_id, ServerMessage::request_error(request_id, &error));
            return;
        }

        self.send(
            session_id,
            ServerMessage::RequestAcknowledged {
                request_id: request_id.clone(),
            },
        );
        self.emit(SessionEvent::AiRequest {
            session_id: session_id.clone(),
            request,
        });
    }

    /// Queue a message; returns false if the session is gone
    pub fn send(&self, session_id: &SessionId, message: ServerMessage) -> bool {
        let Some(session) = self.sessions.get(session_id) else {
            return false;
        };
        session
            .transport
            .send(TransportFrame::Text(message.to_text()))
            .is_ok()
    }

    /// Refresh the heartbeat for a transport-level pong
    pub fn touch_heartbeat(&self, session_id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.last_seen = self.clock.now_millis();
        }
    }

    /// Release a finished request's binding
    pub fn unbind_request(&self, request_id: &RequestId) {
        if let Some((_, session_id)) = self.requests.remove(request_id) {
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                if session.request_id.as_ref() == Some(request_id) {
                    session.request_id = None;
                }
            }
        }
    }

    /// Session a request is bound to
    #[must_use]
    pub fn session_for_request(&self, request_id: &RequestId) -> Option<SessionId> {
        self.requests.get(request_id).map(|s| s.value().clone())
    }

    /// Close a session. A second call for the same id does nothing.
    pub fn close_session(&self, session_id: &SessionId, reason: &str) {
        let Some((_, mut session)) = self.sessions.remove(session_id) else {
            return;
        };
        session.phase = SessionPhase::Closed;

        let _ = session.transport.send(TransportFrame::Text(
            ServerMessage::SessionClosed {
                reason: reason.to_string(),
            }
            .to_text(),
        ));
        let _ = session.transport.send(TransportFrame::Close {
            code: NORMAL_CLOSURE,
            reason: reason.to_string(),
        });

        let request_id = session.request_id.take();
        if let Some(request_id) = &request_id {
            self.requests.remove(request_id);
        }

        info!(
            session_id = %session_id,
            reason,
            request_id = ?request_id,
            "Session closed"
        );
        self.emit(SessionEvent::SessionClosed {
            session_id: session_id.clone(),
            request_id,
        });
    }

    /// Close every session
    pub fn close_all(&self, reason: &str) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for id in ids {
            self.close_session(&id, reason);
        }
    }

    /// Ping live sessions and close those silent for two intervals
    pub fn heartbeat_tick(&self) -> usize {
        let now = self.clock.now_millis();
        let limit = 2 * self.config.heartbeat_interval.as_millis() as u64;

        let mut stale = Vec::new();
        for entry in self.sessions.iter() {
            if now.saturating_sub(entry.last_seen) > limit {
                stale.push(entry.key().clone());
            } else {
                let _ = entry.transport.send(TransportFrame::Text(
                    ServerMessage::Ping { timestamp: now }.to_text(),
                ));
            }
        }

        for id in &stale {
            self.close_session(id, "Heartbeat timeout");
        }
        stale.len()
    }

    /// Close sessions idle past the timeout. Sessions with a bound request
    /// are left alone.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let limit = self.config.idle_timeout.as_millis() as u64;

        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.request_id.is_none() && now.saturating_sub(s.last_activity) > limit)
            .map(|s| s.key().clone())
            .collect();

        for id in &idle {
            self.close_session(id, "Idle timeout");
        }
        idle.len()
    }

    /// Run heartbeats and the idle sweep until `shutdown` fires
    pub fn spawn_maintenance(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let heartbeat_every = self.config.heartbeat_interval;
            let sweep_every = self.config.sweep_interval;
            let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
            let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = heartbeat.tick() => {
                        let closed = self.heartbeat_tick();
                        if closed > 0 {
                            info!(closed, "Closed sessions after missed heartbeats");
                        }
                    }
                    _ = sweep.tick() => {
                        let closed = self.sweep_idle();
                        if closed > 0 {
                            info!(closed, "Closed idle sessions");
                        }
                    }
                }
            }
            debug!("Session maintenance stopped");
        })
    }

    /// Open sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// View of one session
    #[must_use]
    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(session_id).map(|s| SessionSnapshot {
            id: s.key().clone(),
            user_id: s.metadata.user_id.clone(),
            connected_at: s.metadata.connected_at,
            request_id: s.request_id.clone(),
            phase: s.phase,
        })
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            warn!("Session event dropped, no orchestrator listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ManualClock;
    use serde_json::{json, Value};
    use transport::TransportReceiver;

    struct Harness {
        clock: Arc<ManualClock>,
        manager: SessionManager,
        events: SessionEvents,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (manager, events) = SessionManager::new(
            SessionConfig::default(),
            clock.clone(),
            GatewayMetrics::new().expect("metrics"),
        );
        Harness {
            clock,
            manager,
            events,
        }
    }

    fn open(manager: &SessionManager) -> (SessionId, TransportReceiver) {
        let (tx, mut rx) = transport::channel();
        let id = manager.create_session(tx, SessionMetadata::new(Some("u1".to_string()), None));
        let connected = next_json(&mut rx);
        assert_eq!(connected["type"], "connected");
        (id, rx)
    }

    fn next_json(rx: &mut TransportReceiver) -> Value {
        match rx.try_recv().expect("frame queued") {
            TransportFrame::Text(text) => serde_json::from_str(&text).expect("json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn ai_request(id: &str) -> String {
        json!({
            "type": "ai_request",
            "requestId": id,
            "data": {"model": "openai/gpt-4o", "messages": [{"role": "user", "content": "hi"}], "stream": true}
        })
        .to_string()
    }

    #[test]
    fn test_create_session_sends_connected() {
        let h = harness();
        let (id, _rx) = open(&h.manager);
        assert_eq!(h.manager.session_count(), 1);
        let snapshot = h.manager.snapshot(&id).expect("session");
        assert_eq!(snapshot.phase, SessionPhase::Active);
        assert_eq!(snapshot.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_ping_pong_and_protocol_errors() {
        let h = harness();
        let (id, mut rx) = open(&h.manager);

        h.manager.handle_message(&id, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx)["type"], "pong");

        h.manager.handle_message(&id, "{{{");
        let reply = next_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"]["code"], "malformed_message");

        h.manager.handle_message(&id, r#"{"type":"teleport"}"#);
        assert_eq!(next_json(&mut rx)["error"]["code"], "unknown_message_type");

        // Protocol errors never close the session
        assert_eq!(h.manager.session_count(), 1);
    }

    #[test]
    fn test_ai_request_binds_and_emits() {
        let mut h = harness();
        let (id, mut rx) = open(&h.manager);

        h.manager.handle_message(&id, &ai_request("r1"));
        let ack = next_json(&mut rx);
        assert_eq!(ack["type"], "request_acknowledged");
        assert_eq!(ack["requestId"], "r1");

        match h.events.try_recv().expect("event") {
            SessionEvent::AiRequest { session_id, request } => {
                assert_eq!(session_id, id);
                assert_eq!(request.id, RequestId::from("r1"));
                assert_eq!(request.session_id.as_ref(), Some(&id));
                assert_eq!(request.user.as_deref(), Some("u1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.manager.session_for_request(&RequestId::from("r1")), Some(id.clone()));

        // A second request while busy is rejected
        h.manager.handle_message(&id, &ai_request("r2"));
        let reply = next_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["requestId"], "r2");
        assert_eq!(reply["error"]["code"], "session_busy");
        assert!(h.events.try_recv().is_err());

        // After unbinding, the session accepts a new request
        h.manager.unbind_request(&RequestId::from("r1"));
        h.manager.handle_message(&id, &ai_request("r2"));
        assert_eq!(next_json(&mut rx)["type"], "request_acknowledged");
    }

    #[test]
    fn test_stream_control_targets_bound_request() {
        let mut h = harness();
        let (id, mut rx) = open(&h.manager);

        h.manager
            .handle_message(&id, r#"{"type":"stream_control","action":"stop"}"#);
        assert_eq!(next_json(&mut rx)["error"]["code"], "no_active_request");

        h.manager.handle_message(&id, &ai_request("r1"));
        let _ack = next_json(&mut rx);
        let _ = h.events.try_recv();

        h.manager
            .handle_message(&id, r#"{"type":"stream_control","action":"pause"}"#);
        match h.events.try_recv().expect("event") {
            SessionEvent::StreamControl {
                request_id, action, ..
            } => {
                assert_eq!(request_id, RequestId::from("r1"));
                assert_eq!(action, StreamAction::Pause);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut h = harness();
        let (id, mut rx) = open(&h.manager);
        h.manager.handle_message(&id, &ai_request("r1"));
        let _ack = next_json(&mut rx);
        let _ = h.events.try_recv();

        h.manager.close_session(&id, "bye");
        h.manager.close_session(&id, "bye again");

        assert_eq!(next_json(&mut rx)["type"], "session_closed");
        assert_eq!(
            rx.try_recv().expect("close frame"),
            TransportFrame::Close {
                code: NORMAL_CLOSURE,
                reason: "bye".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        match h.events.try_recv().expect("event") {
            SessionEvent::SessionClosed { request_id, .. } => {
                assert_eq!(request_id, Some(RequestId::from("r1")));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.manager.session_count(), 0);
        assert!(h.manager.session_for_request(&RequestId::from("r1")).is_none());
        assert!(!h.manager.send(&id, ServerMessage::Pong { timestamp: 0 }));
    }

    #[test]
    fn test_heartbeat_timeout() {
        let h = harness();
        let (quiet, mut quiet_rx) = open(&h.manager);
        let (chatty, mut chatty_rx) = open(&h.manager);

        h.clock.advance(Duration::from_secs(30));
        assert_eq!(h.manager.heartbeat_tick(), 0);
        assert_eq!(next_json(&mut quiet_rx)["type"], "ping");
        assert_eq!(next_json(&mut chatty_rx)["type"], "ping");

        h.clock.advance(Duration::from_secs(20));
        h.manager.handle_message(&chatty, r#"{"type":"pong"}"#);

        h.clock.advance(Duration::from_secs(11));
        assert_eq!(h.manager.heartbeat_tick(), 1);
        assert!(h.manager.snapshot(&quiet).is_none());
        assert!(h.manager.snapshot(&chatty).is_some());

        let closed = next_json(&mut quiet_rx);
        assert_eq!(closed["type"], "session_closed");
        assert_eq!(closed["reason"], "Heartbeat timeout");
    }

    #[test]
    fn test_idle_sweep_skips_busy_sessions() {
        let h = harness();
        let (idle, _idle_rx) = open(&h.manager);
        let (busy, mut busy_rx) = open(&h.manager);
        h.manager.handle_message(&busy, &ai_request("r1"));
        let _ack = next_json(&mut busy_rx);

        h.clock.advance(Duration::from_secs(121));
        assert_eq!(h.manager.sweep_idle(), 1);
        assert!(h.manager.snapshot(&idle).is_none());
        assert!(h.manager.snapshot(&busy).is_some());
    }

    #[test]
    fn test_session_gauge() {
        let h = harness();
        let metrics = h.manager.metrics.clone();
        let (id, _rx) = open(&h.manager);
        assert_eq!(metrics.active_sessions(), 1);
        h.manager.close_session(&id, "done");
        assert_eq!(metrics.active_sessions(), 0);
    }
}
