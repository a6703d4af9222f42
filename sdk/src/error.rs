use std::time::Duration;

use thiserror::Error;
use penny_protocol::ProtocolError;

/// Errors surfaced by gateway and voice sessions
#[derive(Error, Debug)]
pub enum SdkError {
    /// The peer sent a frame that does not fit the current handshake step.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A handshake step did not complete within its deadline.
    #[error("Timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Heartbeat ACK not received within {0:?}")]
    MissedHeartbeatAck(Duration),

    #[error("A voice join is already in progress")]
    JoinInProgress,

    #[error("Disconnected")]
    Disconnected,

    /// The REST collaborator failed.
    #[error("API error: {0}")]
    Api(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SdkError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        SdkError::Transport(e.to_string())
    }
}

// URLs are dropped: interaction callback paths embed the interaction token.
impl From<reqwest::Error> for SdkError {
    fn from(e: reqwest::Error) -> Self {
        SdkError::Api(e.without_url().to_string())
    }
}
