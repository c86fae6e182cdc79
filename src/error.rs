//! Error types for the connection hub
//!
//! Defines connection-level errors and outbound enqueue errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Every variant is fatal to the connection that produced it and to nothing
/// else. Decode failures on inbound frames are logged by the reader pump and
/// never surface as an `AppError`.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (includes frame size overflow)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The hub actor is gone (command channel closed)
    #[error("Hub closed")]
    HubClosed,

    /// Upgrade request rejected by the auth stub
    #[error("Unauthorized")]
    Unauthorized,

    /// Nothing was read within the read deadline
    #[error("Read deadline expired")]
    ReadTimeout,

    /// A write did not complete within the write deadline
    #[error("Write deadline expired")]
    WriteTimeout,

    /// The peer did not finish the upgrade within the deadline
    #[error("Handshake deadline expired")]
    HandshakeTimeout,
}

/// Outbound enqueue errors
///
/// Returned by the non-blocking enqueue onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is saturated (slow consumer)
    #[error("Outbound queue full")]
    Full,

    /// The queue was closed by unregister
    #[error("Outbound queue closed")]
    Closed,
}
