//! Outbound side of a control connection.

use tokio::sync::mpsc;

use crate::ipc::protocol::{Response, ServerMessage};

/// Cloneable handle that queues lines for one connection's writer task.
///
/// Sends are best-effort: once the peer is gone the writer task stops, the
/// channel closes, and further sends are dropped silently.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    #[must_use]
    pub fn channel(id: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// Endpoint-local connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a message; returns `false` if the connection is already closed.
    pub fn send(&self, message: &ServerMessage) -> bool {
        self.tx.send(message.to_line()).is_ok()
    }

    /// Queue a response.
    pub fn respond(&self, response: Response) -> bool {
        self.send(&ServerMessage::Response(response))
    }

    /// Whether the writer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
