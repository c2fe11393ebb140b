//! Session wire protocol.
//!
//! Every frame is a JSON text message with a `type` discriminator. Inbound
//! messages may carry their payload under `data` or inline next to `type`:
//!
//! ```json
//! {"type": "ai_request", "requestId": "r1", "data": {"model": "openai/gpt-4o", "messages": []}}
//! {"type": "stream_control", "requestId": "r1", "action": "pause"}
//! ```

use gateway_core::{
    ChatRequest, ErrorPayload, GatewayError, ReasoningToken, RequestId, SessionId, ToolCallDelta,
    UnifiedResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

/// Control action for an in-flight stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    /// Cancel the request
    Stop,
    /// Suspend forwarding
    Pause,
    /// Continue forwarding
    Resume,
}

/// Parsed inbound message
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Start a chat request
    AiRequest {
        /// Request id from the envelope, overriding any in the payload
        request_id: Option<RequestId>,
        /// The request
        request: Box<ChatRequest>,
    },
    /// Control the bound request
    StreamControl {
        /// Target request; defaults to the session's bound request
        request_id: Option<RequestId>,
        /// What to do
        action: StreamAction,
    },
    /// Application-level ping
    Ping,
    /// Reply to a server ping
    Pong,
}

/// Why an inbound frame was rejected
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not a JSON object with a `type`
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Unrecognized `type`
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Payload did not match the message type
    #[error("Invalid {kind} payload: {message}")]
    InvalidPayload {
        /// Message type
        kind: &'static str,
        /// Parser message
        message: String,
    },
}

impl ProtocolError {
    /// Wire error for the reply
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        let code = match self {
            Self::Malformed(_) => "malformed_message",
            Self::UnknownType(_) => "unknown_message_type",
            Self::InvalidPayload { .. } => "invalid_payload",
        };
        GatewayError::validation(self.to_string(), None, code).to_payload()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "requestId", default)]
    request_id: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl Envelope {
    /// `data` when present, otherwise the inline fields
    fn payload(self) -> (Option<RequestId>, Value) {
        let request_id = self.request_id.map(RequestId::from);
        let payload = self.data.unwrap_or(Value::Object(self.rest));
        (request_id, payload)
    }
}

#[derive(Debug, Deserialize)]
struct ControlPayload {
    action: StreamAction,
}

/// Parse one inbound text frame
///
/// # Errors
/// Returns a `ProtocolError` describing the rejection
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    match envelope.kind.as_str() {
        "ai_request" => {
            let (request_id, payload) = envelope.payload();
            let request: ChatRequest =
                serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
                    kind: "ai_request",
                    message: e.to_string(),
                })?;
            Ok(ClientMessage::AiRequest {
                request_id,
                request: Box::new(request),
            })
        }
        "stream_control" => {
            let (request_id, payload) = envelope.payload();
            let control: ControlPayload =
                serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
                    kind: "stream_control",
                    message: e.to_string(),
                })?;
            Ok(ClientMessage::StreamControl {
                request_id,
                action: control.action,
            })
        }
        "ping" => Ok(ClientMessage::Ping),
        "pong" => Ok(ClientMessage::Pong),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

/// One piece of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChunkFrame {
    /// Answer text
    Content(String),
    /// Reasoning tokens
    Reasoning(Vec<ReasoningToken>),
    /// Tool-call fragments
    ToolCalls(Vec<ToolCallDelta>),
}

/// Outbound message
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Session established
    Connected {
        /// New session id
        session_id: SessionId,
        /// Server ping interval
        heartbeat_interval_ms: u64,
    },
    /// `ai_request` accepted
    RequestAcknowledged {
        /// Bound request
        request_id: RequestId,
    },
    /// Streamed piece
    StreamChunk {
        /// Owning request
        request_id: RequestId,
        /// The piece
        chunk: ChunkFrame,
    },
    /// Final response; `finishReason` is `cancelled` after a stop
    StreamComplete {
        /// Owning request
        request_id: RequestId,
        /// Assembled response
        completion: Box<UnifiedResponse>,
    },
    /// Failure
    Error {
        /// Owning request, absent for protocol errors
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        /// Error details
        error: ErrorPayload,
    },
    /// The server is closing the session
    SessionClosed {
        /// Why
        reason: String,
    },
    /// Heartbeat probe
    Ping {
        /// Server time in epoch milliseconds
        timestamp: u64,
    },
    /// Reply to a client ping
    Pong {
        /// Server time in epoch milliseconds
        timestamp: u64,
    },
}

impl ServerMessage {
    /// Error reply for a request
    #[must_use]
    pub fn request_error(request_id: RequestId, error: &GatewayError) -> Self {
        Self::Error {
            request_id: Some(request_id),
            error: error.to_payload(),
        }
    }

    /// Serialize to a text frame
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize session message");
            r#"{"type":"error","error":{"kind":"internal_error","code":"serialization_failed","message":"failed to serialize message"}}"#
                .to_string()
        })
    }
}
