//! Error type shared by the client session and the relay server.

use thiserror::Error;

/// Errors produced by the collaboration layer.
///
/// Most failures never reach callers: transport failures are recovered by
/// the reconnection loop and malformed frames are logged and dropped.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Invalid page origin '{0}'")]
    InvalidOrigin(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
