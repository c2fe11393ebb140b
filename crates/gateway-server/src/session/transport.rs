//! Outbound half of a session's socket.
//!
//! The session manager never touches the socket. It pushes frames into an
//! unbounded channel and the connection's egress task is the only writer.

use tokio::sync::mpsc;

/// WebSocket close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// A frame queued for the egress task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// JSON text frame
    Text(String),
    /// Close the socket
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Sending side held by the session manager
pub type TransportSender = mpsc::UnboundedSender<TransportFrame>;

/// Receiving side drained by the egress task
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportFrame>;

/// Create a transport channel
#[must_use]
pub fn channel() -> (TransportSender, TransportReceiver) {
    mpsc::unbounded_channel()
}
