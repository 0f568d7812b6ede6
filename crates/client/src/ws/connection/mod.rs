//! Transport abstraction, connection state and reconnect policy.
//!
//! This module provides the shared types and conditionally includes
//! the platform-specific WebSocket transport.

use std::fmt;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use kelmah_shared::TransportError;

/// Connection state for the real-time channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts after a drop (0 = fail on the first drop)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 5000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number (zero-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }
}

/// What a transport reports back to the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The handshake completed; `socket_id` identifies this connection.
    Opened { socket_id: String },
    /// A text frame arrived.
    Frame(String),
    /// The connection is gone (or never came up).
    Closed { reason: String },
    /// A transport-level error. Treated like a close.
    Error(String),
}

/// A [`TransportEvent`] stamped with the generation of the open that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEnvelope {
    pub generation: u64,
    pub event: TransportEvent,
}

pub type TransportReceiver = UnboundedReceiver<TransportEnvelope>;

/// Handed to [`Transport::open`]; every event the opened connection produces
/// goes through it.
#[derive(Debug, Clone)]
pub struct TransportSender {
    generation: u64,
    tx: UnboundedSender<TransportEnvelope>,
}

impl TransportSender {
    pub(crate) fn new(generation: u64, tx: UnboundedSender<TransportEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` once the receiving session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .unbounded_send(TransportEnvelope {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A bidirectional text-frame connection.
///
/// Implementations never block: `open` starts the handshake and reports its
/// outcome later through the sender.
pub trait Transport {
    fn open(&mut self, url: &str, events: TransportSender) -> Result<(), TransportError>;
    fn send(&mut self, frame: String) -> Result<(), TransportError>;
    /// Tear down the current connection, if any. Must not emit further events.
    fn close(&mut self);
}

// Include platform-specific implementation
#[cfg(target_arch = "wasm32")]
mod connection_wasm;
#[cfg(target_arch = "wasm32")]
pub use connection_wasm::WsTransport;

#[cfg(not(target_arch = "wasm32"))]
mod connection_native;
#[cfg(not(target_arch = "wasm32"))]
pub use connection_native::WsTransport;
