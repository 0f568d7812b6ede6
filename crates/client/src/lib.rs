//! Kelmah Client - real-time synchronization engine
//!
//! This crate keeps a web or desktop client in sync with the Kelmah backend
//! over a single WebSocket: connection lifecycle with bounded reconnects,
//! an outbound queue for intents made while offline, a typed event
//! dispatcher, and the notification, conversation and presence stores fed
//! by it.

pub mod clock;
pub mod config;
pub mod logging;
pub mod stores;
pub mod ws;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use stores::{ConversationStore, NotificationStore, PresenceStore, SharedStores};
pub use ws::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, EventDispatcher, EventKind,
    ReconnectConfig, SendOutcome, SyncError, SyncEvent, SyncHandle, SyncSession, WsTransport,
};
