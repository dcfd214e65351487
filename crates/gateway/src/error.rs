//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame on either hop.
    #[error("frame error: {0}")]
    Frame(#[from] protocol::FrameError),

    /// Consul or Redis failure.
    #[error("external service error: {0}")]
    Services(#[from] external_services::Error),

    /// Login payload (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client's WebSocket writer channel is gone.
    #[error("channel send error")]
    ChannelSend,

    /// A game server has no live TCP connection.
    #[error("game server {0} is not connected")]
    NotConnected(String),

    /// A bound game server is no longer in the fleet.
    #[error("game server {0} not found in fleet")]
    ServerNotFound(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
