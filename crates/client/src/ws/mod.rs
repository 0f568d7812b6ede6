//! Real-time channel to the Kelmah backend.
//!
//! This module provides:
//! - Connection management with bounded auto-reconnect and a heartbeat
//! - An outbound queue replayed in order after every (re)connection
//! - A typed event dispatcher that isolates misbehaving listeners
//!
//! # Architecture
//!
//! ```text
//!   ┌───────────┐  commands   ┌──────────────────────────────────────┐
//!   │SyncHandle │────────────▶│             SyncSession              │
//!   │ (clones)  │             │  select { commands, transport, timer}│
//!   └───────────┘             └──────────────────────────────────────┘
//!                                              │
//!                                              ▼
//!                             ┌──────────────────────────────────────┐
//!                             │          ConnectionManager           │
//!                             │ state · OutboundQueue · TimerArena   │
//!                             └──────────────────────────────────────┘
//!                               │ frames ▲ TransportEnvelope │ SyncEvent
//!                               ▼        │                   ▼
//!                      ┌──────────────────────┐   ┌─────────────────────┐
//!                      │ WsTransport          │   │  EventDispatcher    │
//!                      │ (tungstenite / web)  │   │   ──▶ SharedStores  │
//!                      └──────────────────────┘   └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let (mut session, handle) = SyncSession::new(config, WsTransport::new(), Rc::new(SystemClock));
//! let stores = SharedStores::new();
//! stores.attach(session.manager_mut().dispatcher_mut(), Rc::new(SystemClock));
//! session.spawn_local();
//!
//! handle.connect(Credentials::new("u1", UserRole::Worker, token))?;
//! handle.send_message("conv-1", "On my way", vec![]).await?;
//! ```

mod connection;
mod dispatcher;
mod manager;
mod queue;
mod session;
mod timers;

pub use connection::{
    ConnectionState, ReconnectConfig, Transport, TransportEnvelope, TransportEvent,
    TransportReceiver, TransportSender, WsTransport,
};
pub use dispatcher::{DispatchReport, EventDispatcher, EventKind, Listener, ListenerId, SyncEvent};
pub use manager::{ConnectionManager, ConnectionSnapshot, SendOutcome, TimerKind};
pub use queue::{OutboundQueue, QueuedIntent};
pub use session::{SyncError, SyncHandle, SyncSession};
pub use timers::{Timer, TimerArena, TimerId};
