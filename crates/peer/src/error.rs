//! Error types for the roomcast peer library.

use thiserror::Error;

/// Result type alias for peer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur establishing or driving a session.
#[derive(Debug, Error)]
pub enum Error {
    /// Signaling channel failure (connect or relay loss)
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Media-transport engine failure
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Opaque description or candidate the engine cannot interpret
    #[error("Invalid session payload: {0}")]
    InvalidPayload(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
