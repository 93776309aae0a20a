//! Error types for the roomcast relay.

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur accepting or servicing a connection.
///
/// Routing itself never errors: unroutable messages are dropped silently
/// per the fire-and-forget signaling contract.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the listener or a connection socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
