//! Shared error types for the real-time channel.

use thiserror::Error;

/// Errors raised while turning protocol values into frames and back.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An outbound command could not be serialized.
    #[error("failed to encode `{event}` frame: {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// An inbound frame was not valid JSON or named an unknown event.
    #[error("failed to decode inbound frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// A role string did not match any known user role.
    #[error("unknown user role `{0}`")]
    UnknownRole(String),
}

/// Errors reported by a transport implementation.
///
/// These never cross the connection manager's public boundary; the manager
/// turns them into state transitions and notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("failed to open transport: {0}")]
    Open(String),
    #[error("failed to send frame: {0}")]
    Send(String),
}
