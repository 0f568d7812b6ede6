//! Typed publish/subscribe for everything the sync engine produces.
//!
//! Listeners are keyed by [`EventKind`] and run synchronously in
//! registration order. A listener that returns an error or panics is
//! logged and skipped; the remaining listeners still run and the
//! dispatcher stays usable.
//!
//! Panic isolation relies on unwinding. On `wasm32` panics abort, so there
//! only `Err` returns are isolated and a panicking listener takes the whole
//! module down. Listeners meant for the browser should return errors.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use kelmah_shared::{Notification, ServerEvent};

use super::ConnectionState;

/// Everything a listener can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A decoded inbound frame.
    Server(ServerEvent),
    /// A notification synthesized locally (connection status changes).
    Notification(Notification),
    ConnectionChanged(ConnectionState),
}

/// Subscription key: one per inbound event name plus the two local events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    MessageStatus,
    TypingIndicator,
    JobNotification,
    JobApplication,
    JobStatusUpdate,
    PaymentNotification,
    PaymentStatusUpdate,
    BidReceived,
    BidAccepted,
    BidRejected,
    BidWithdrawn,
    BidExpired,
    UserOnline,
    UserOffline,
    OnlineUsers,
    SystemNotification,
    MaintenanceNotice,
    Notification,
    ConnectionChanged,
}

impl EventKind {
    pub fn of(event: &SyncEvent) -> Self {
        match event {
            SyncEvent::Server(server) => Self::of_server(server),
            SyncEvent::Notification(_) => EventKind::Notification,
            SyncEvent::ConnectionChanged(_) => EventKind::ConnectionChanged,
        }
    }

    pub fn of_server(event: &ServerEvent) -> Self {
        match event {
            ServerEvent::NewMessage(_) => EventKind::NewMessage,
            ServerEvent::MessageStatus(_) => EventKind::MessageStatus,
            ServerEvent::TypingIndicator(_) => EventKind::TypingIndicator,
            ServerEvent::JobNotification(_) => EventKind::JobNotification,
            ServerEvent::JobApplication(_) => EventKind::JobApplication,
            ServerEvent::JobStatusUpdate(_) => EventKind::JobStatusUpdate,
            ServerEvent::PaymentNotification(_) => EventKind::PaymentNotification,
            ServerEvent::PaymentStatusUpdate(_) => EventKind::PaymentStatusUpdate,
            ServerEvent::BidReceived(_) => EventKind::BidReceived,
            ServerEvent::BidAccepted(_) => EventKind::BidAccepted,
            ServerEvent::BidRejected(_) => EventKind::BidRejected,
            ServerEvent::BidWithdrawn(_) => EventKind::BidWithdrawn,
            ServerEvent::BidExpired(_) => EventKind::BidExpired,
            ServerEvent::UserOnline(_) => EventKind::UserOnline,
            ServerEvent::UserOffline(_) => EventKind::UserOffline,
            ServerEvent::OnlineUsers(_) => EventKind::OnlineUsers,
            ServerEvent::SystemNotification(_) => EventKind::SystemNotification,
            ServerEvent::MaintenanceNotice(_) => EventKind::MaintenanceNotice,
        }
    }

    /// Inbound kinds that produce a user-visible notification.
    pub const NOTIFYING: [EventKind; 7] = [
        EventKind::NewMessage,
        EventKind::JobNotification,
        EventKind::JobApplication,
        EventKind::JobStatusUpdate,
        EventKind::PaymentNotification,
        EventKind::SystemNotification,
        EventKind::MaintenanceNotice,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Rc<dyn Fn(&SyncEvent) -> anyhow::Result<()>>;

/// Outcome of one [`EventDispatcher::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventDispatcher {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        listener: impl Fn(&SyncEvent) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, kind: EventKind, id: ListenerId) {
        if let Some(list) = self.listeners.get_mut(&kind) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                self.listeners.remove(&kind);
            }
        }
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn dispatch(&self, event: &SyncEvent) -> DispatchReport {
        let kind = EventKind::of(event);
        let mut report = DispatchReport::default();
        let Some(list) = self.listeners.get(&kind) else {
            return report;
        };

        for (id, listener) in list {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    crate::log_error!("Listener {:?} for {:?} failed: {:#}", id, kind, e);
                }
                Err(panic) => {
                    report.failed += 1;
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    crate::log_error!("Listener {:?} for {:?} panicked: {}", id, kind, detail);
                }
            }
        }
        report
    }
}
