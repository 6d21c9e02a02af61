//! Push channel abstraction.

use thiserror::Error;

/// Errors raised by a push connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// A frame could not be sent or received.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Opens push connections.
///
/// This abstracts the socket layer so any WebSocket library (or an
/// in-memory double) can carry live events.
pub trait PushConnector: Send + Sync {
    /// Opens a connection to `url`.
    fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, PushError>;
}

/// One open push connection carrying JSON text frames.
///
/// All methods take `&self` so a reader thread can block in
/// [`PushConnection::recv`] while another thread closes the connection.
pub trait PushConnection: Send + Sync {
    /// Sends a text frame.
    fn send(&self, frame: &str) -> Result<(), PushError>;

    /// Blocks until the next frame arrives.
    ///
    /// Returns `Ok(None)` once the connection is closed.
    fn recv(&self) -> Result<Option<String>, PushError>;

    /// Closes the connection, waking any blocked `recv`.
    fn close(&self);
}
