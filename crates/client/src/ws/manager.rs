//! Connection lifecycle for the real-time channel.
//!
//! [`ConnectionManager`] is sans-IO: it owns the transport, the outbound
//! queue, the dispatcher and a [`TimerArena`], but never sleeps or polls.
//! Whoever drives it (normally [`super::SyncSession`]) feeds it transport
//! envelopes and calls [`ConnectionManager::fire_due_timers`] when the next
//! deadline passes.

use std::collections::BTreeSet;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use kelmah_shared::{
    Attachment, ClientCommand, Credentials, Handshake, Notification, NotificationKind,
    ProtocolError, ServerEvent, Severity, Topic, TopicChange, TransportError,
};
use thiserror::Error;

use super::connection::{
    ConnectionState, Transport, TransportEnvelope, TransportEvent, TransportReceiver,
    TransportSender,
};
use super::dispatcher::{EventDispatcher, EventKind, ListenerId, SyncEvent};
use super::queue::OutboundQueue;
use super::timers::{TimerArena, TimerId};
use crate::clock::Clock;
use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Reconnect,
    Heartbeat,
    HandshakeTimeout,
}

/// What happened to a command handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport.
    Sent,
    /// Held until the next successful connection.
    Queued,
    /// Discarded (ephemeral while offline, or unencodable).
    Dropped,
}

/// Point-in-time view of the connection, for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub socket_id: Option<String>,
    pub reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub queued_intents: usize,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Error)]
enum TransmitError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct ConnectionManager<T: Transport> {
    config: SyncConfig,
    transport: T,
    clock: Rc<dyn Clock>,
    events_tx: UnboundedSender<TransportEnvelope>,
    /// Bumped on every open and every teardown; older envelopes are ignored.
    generation: u64,
    state: ConnectionState,
    credentials: Option<Credentials>,
    socket_id: Option<String>,
    reconnect_attempts: u32,
    last_connected_at: Option<DateTime<Utc>>,
    queue: OutboundQueue,
    dispatcher: EventDispatcher,
    timers: TimerArena<TimerKind>,
    reconnect_timer: Option<TimerId>,
    heartbeat_timer: Option<TimerId>,
    handshake_timer: Option<TimerId>,
    topics: BTreeSet<Topic>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a disconnected manager. Transport events for it arrive on the
    /// returned receiver and must be passed to
    /// [`handle_transport_envelope`](Self::handle_transport_envelope).
    pub fn new(config: SyncConfig, transport: T, clock: Rc<dyn Clock>) -> (Self, TransportReceiver) {
        let (events_tx, events_rx) = unbounded();
        let manager = Self {
            config,
            transport,
            clock,
            events_tx,
            generation: 0,
            state: ConnectionState::Disconnected,
            credentials: None,
            socket_id: None,
            reconnect_attempts: 0,
            last_connected_at: None,
            queue: OutboundQueue::new(),
            dispatcher: EventDispatcher::new(),
            timers: TimerArena::new(),
            reconnect_timer: None,
            heartbeat_timer: None,
            handshake_timer: None,
            topics: BTreeSet::new(),
        };
        (manager, events_rx)
    }

    // --- Accessors ---

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state.clone(),
            socket_id: self.socket_id.clone(),
            reconnect_attempts: self.reconnect_attempts,
            last_connected_at: self.last_connected_at,
            queued_intents: self.queue.len(),
            topics: self.topics.iter().cloned().collect(),
        }
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    pub fn subscribe(
        &mut self,
        kind: EventKind,
        listener: impl Fn(&SyncEvent) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        self.dispatcher.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, kind: EventKind, id: ListenerId) {
        self.dispatcher.unsubscribe(kind, id);
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    /// How long until the next timer is due; zero if one is overdue.
    pub fn time_until_next_timer(&self) -> Option<std::time::Duration> {
        self.next_deadline().map(|deadline| {
            (deadline - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
        })
    }

    // --- Lifecycle ---

    /// Open the channel for `credentials`.
    ///
    /// Does nothing while a connection is already up or being established.
    pub fn connect(&mut self, credentials: Credentials) {
        if self.state.is_connected() || self.state.is_connecting() {
            crate::log_debug!("connect() ignored, already {}", self.state);
            return;
        }

        crate::log_info!(
            "Connecting to {} as {} ({})",
            self.config.ws_url,
            credentials.user_id,
            credentials.role
        );
        self.credentials = Some(credentials);
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connecting);
        self.open_transport();
    }

    /// Tear everything down. Safe to call in any state.
    pub fn disconnect(&mut self) {
        self.timers.cancel_all();
        self.reconnect_timer = None;
        self.heartbeat_timer = None;
        self.handshake_timer = None;

        self.transport.close();
        self.generation += 1;

        let discarded = self.queue.clear();
        if discarded > 0 {
            crate::log_warn!("Discarded {} queued intent(s) on disconnect", discarded);
        }

        self.topics.clear();
        self.socket_id = None;
        self.credentials = None;
        self.reconnect_attempts = 0;

        if self.state != ConnectionState::Disconnected {
            crate::log_info!("Disconnected from {}", self.config.ws_url);
        }
        self.set_state(ConnectionState::Disconnected);
        self.dispatcher.clear();
    }

    // --- Outbound ---

    pub fn send(&mut self, command: ClientCommand) -> SendOutcome {
        if !self.state.is_connected() {
            if command.is_ephemeral() {
                crate::log_debug!("Dropping {} while {}", command.event_name(), self.state);
                return SendOutcome::Dropped;
            }
            crate::log_debug!("Queueing {} while {}", command.event_name(), self.state);
            self.queue.enqueue(command, self.clock.now());
            return SendOutcome::Queued;
        }

        match self.transmit(&command) {
            Ok(()) => SendOutcome::Sent,
            Err(TransmitError::Protocol(e)) => {
                crate::log_error!("Dropping unencodable {}: {}", command.event_name(), e);
                SendOutcome::Dropped
            }
            Err(TransmitError::Transport(e)) if command.is_ephemeral() => {
                crate::log_warn!("Send of {} failed: {}", command.event_name(), e);
                SendOutcome::Dropped
            }
            Err(TransmitError::Transport(e)) => {
                crate::log_warn!("Send of {} failed, queueing: {}", command.event_name(), e);
                self.queue.enqueue(command, self.clock.now());
                SendOutcome::Queued
            }
        }
    }

    pub fn send_message(
        &mut self,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> SendOutcome {
        let timestamp = self.clock.now();
        self.send(ClientCommand::SendMessage {
            conversation_id: conversation_id.into(),
            content: content.into(),
            attachments,
            timestamp,
        })
    }

    pub fn send_typing(&mut self, conversation_id: impl Into<String>, is_typing: bool) -> SendOutcome {
        let timestamp = self.clock.now();
        self.send(ClientCommand::TypingIndicator {
            conversation_id: conversation_id.into(),
            is_typing,
            timestamp,
        })
    }

    pub fn mark_message_read(
        &mut self,
        message_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> SendOutcome {
        let timestamp = self.clock.now();
        self.send(ClientCommand::MarkMessageRead {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            timestamp,
        })
    }

    pub fn subscribe_job(&mut self, job_id: impl Into<String>) -> SendOutcome {
        self.send(ClientCommand::SubscribeJob {
            job_id: job_id.into(),
        })
    }

    pub fn unsubscribe_job(&mut self, job_id: impl Into<String>) -> SendOutcome {
        self.send(ClientCommand::UnsubscribeJob {
            job_id: job_id.into(),
        })
    }

    pub fn subscribe_payment(&mut self, transaction_id: impl Into<String>) -> SendOutcome {
        self.send(ClientCommand::SubscribePayment {
            transaction_id: transaction_id.into(),
        })
    }

    // --- Inbound ---

    pub fn handle_transport_envelope(&mut self, envelope: TransportEnvelope) {
        if envelope.generation != self.generation {
            crate::log_debug!(
                "Ignoring stale transport event from generation {} (current {})",
                envelope.generation,
                self.generation
            );
            return;
        }

        match envelope.event {
            TransportEvent::Opened { socket_id } => self.on_opened(socket_id),
            TransportEvent::Frame(text) => self.on_frame(&text),
            TransportEvent::Closed { reason } => self.on_loss(&reason),
            TransportEvent::Error(error) => self.on_loss(&error),
        }
    }

    /// Run every timer whose deadline has passed.
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        for timer in self.timers.take_due(now) {
            match timer.kind {
                TimerKind::Reconnect => {
                    if self.reconnect_timer != Some(timer.id) {
                        continue;
                    }
                    self.reconnect_timer = None;
                    if let ConnectionState::Reconnecting { attempt } = self.state {
                        crate::log_info!("Reconnect attempt {}", attempt);
                        self.open_transport();
                    }
                }
                TimerKind::Heartbeat => {
                    if self.heartbeat_timer != Some(timer.id) {
                        continue;
                    }
                    self.heartbeat_timer = None;
                    if self.state.is_connected() {
                        if let Err(e) = self.transmit(&ClientCommand::Ping { timestamp: now }) {
                            crate::log_warn!("Heartbeat ping failed: {}", e);
                        }
                        self.start_heartbeat();
                    }
                }
                TimerKind::HandshakeTimeout => {
                    if self.handshake_timer != Some(timer.id) {
                        continue;
                    }
                    self.handshake_timer = None;
                    if self.state.is_connecting() {
                        let reason = format!(
                            "handshake timed out after {}s",
                            self.config.handshake_timeout.as_secs()
                        );
                        self.on_loss(&reason);
                    }
                }
            }
        }
    }

    // --- Internals ---

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state.clone();
        self.dispatcher.dispatch(&SyncEvent::ConnectionChanged(state));
    }

    fn notify(&mut self, notification: Notification) {
        self.dispatcher.dispatch(&SyncEvent::Notification(notification));
    }

    fn open_transport(&mut self) {
        let Some(credentials) = self.credentials.as_ref() else {
            crate::log_warn!("open requested without credentials");
            return;
        };

        self.generation += 1;
        let url = self.config.handshake_url(&Handshake::from(credentials));
        let sender = TransportSender::new(self.generation, self.events_tx.clone());

        match self.transport.open(&url, sender) {
            Ok(()) => {
                let deadline = self.clock.now() + to_chrono(self.config.handshake_timeout);
                if let Some(old) = self.handshake_timer.take() {
                    self.timers.cancel(old);
                }
                self.handshake_timer = Some(self.timers.schedule(TimerKind::HandshakeTimeout, deadline));
            }
            Err(e) => {
                crate::log_error!("Failed to open {}: {}", self.config.ws_url, e);
                self.on_loss(&e.to_string());
            }
        }
    }

    fn on_opened(&mut self, socket_id: String) {
        if let Some(id) = self.handshake_timer.take() {
            self.timers.cancel(id);
        }

        let now = self.clock.now();
        let reconnected = matches!(self.state, ConnectionState::Reconnecting { .. });

        crate::log_info!("Connected to {} ({})", self.config.ws_url, socket_id);
        self.socket_id = Some(socket_id);
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(now);
        self.set_state(ConnectionState::Connected);

        let (title, message) = if reconnected {
            ("Reconnected", "Real-time features restored")
        } else {
            ("Connected", "Real-time features activated")
        };
        self.notify(Notification::new(
            NotificationKind::System,
            title,
            message,
            Severity::Success,
            now,
        ));

        if let Some(credentials) = self.credentials.as_ref() {
            let join = ClientCommand::JoinRoom {
                user_id: credentials.user_id.clone(),
                user_role: credentials.role,
                timestamp: now,
            };
            if let Err(e) = self.transmit(&join) {
                crate::log_warn!("join-room failed: {}", e);
            }
        }

        // Topics survive drops and `Failed`; any still tracked here are gone
        // on the backend side.
        if !self.topics.is_empty() {
            let topics: Vec<Topic> = self.topics.iter().cloned().collect();
            crate::log_debug!("Resubscribing {} topic(s)", topics.len());
            for topic in topics {
                if let Err(e) = self.transmit(&topic.subscribe_command()) {
                    crate::log_warn!("Resubscribe to {} failed: {}", topic, e);
                }
            }
        }

        self.start_heartbeat();
        self.flush_queue();
    }

    fn on_frame(&mut self, text: &str) {
        match ServerEvent::decode(text) {
            Ok(event) => {
                crate::log_debug!("Received {}", event.event_name());
                self.dispatcher.dispatch(&SyncEvent::Server(event));
            }
            Err(e) => crate::log_warn!("Dropping undecodable frame: {}", e),
        }
    }

    fn on_loss(&mut self, reason: &str) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed { .. }
        ) {
            return;
        }
        let was_connected = self.state.is_connected();

        self.transport.close();
        self.generation += 1;
        for id in [self.heartbeat_timer.take(), self.handshake_timer.take()]
            .into_iter()
            .flatten()
        {
            self.timers.cancel(id);
        }
        self.socket_id = None;

        let now = self.clock.now();
        crate::log_warn!("Connection to {} lost: {}", self.config.ws_url, reason);

        if was_connected {
            self.notify(Notification::new(
                NotificationKind::System,
                "Disconnected",
                "Reconnecting to real-time services...",
                Severity::Warning,
                now,
            ));
        }

        let max_attempts = self.config.reconnect.max_attempts;
        if self.reconnect_attempts >= max_attempts {
            crate::log_error!(
                "Giving up on {} after {} reconnect attempt(s)",
                self.config.ws_url,
                self.reconnect_attempts
            );
            self.set_state(ConnectionState::Failed {
                reason: format!("Max reconnect attempts ({}) exceeded: {}", max_attempts, reason),
            });
            self.notify(
                Notification::new(
                    NotificationKind::System,
                    "Connection Failed",
                    "Unable to connect to real-time services",
                    Severity::Error,
                    now,
                )
                .persistent(),
            );
            return;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay_ms = self.config.reconnect.delay_for_attempt(attempt - 1);
        crate::log_info!("Reconnecting in {}ms (attempt {})", delay_ms, attempt);

        self.set_state(ConnectionState::Reconnecting { attempt });
        let deadline = now + chrono::Duration::milliseconds(i64::from(delay_ms));
        self.reconnect_timer = Some(self.timers.schedule(TimerKind::Reconnect, deadline));
    }

    fn start_heartbeat(&mut self) {
        if let Some(old) = self.heartbeat_timer.take() {
            self.timers.cancel(old);
        }
        if let Some(interval) = self.config.heartbeat_interval {
            let deadline = self.clock.now() + to_chrono(interval);
            self.heartbeat_timer = Some(self.timers.schedule(TimerKind::Heartbeat, deadline));
        }
    }

    fn flush_queue(&mut self) {
        let intents = self.queue.drain();
        if intents.is_empty() {
            return;
        }

        let total = intents.len();
        let mut sent = 0;
        let mut pending = intents.into_iter();
        while let Some(intent) = pending.next() {
            match self.transmit(&intent.command) {
                Ok(()) => sent += 1,
                Err(TransmitError::Protocol(e)) => {
                    crate::log_error!("Dropping unencodable {}: {}", intent.command.event_name(), e);
                }
                Err(TransmitError::Transport(e)) => {
                    crate::log_warn!("Flush interrupted: {}", e);
                    let rest: Vec<_> = std::iter::once(intent).chain(pending).collect();
                    for intent in rest.into_iter().rev() {
                        self.queue.requeue_front(intent);
                    }
                    break;
                }
            }
        }
        crate::log_info!("Flushed {}/{} queued intent(s)", sent, total);
    }

    /// Encode and write one command, tracking topic changes once it is out.
    fn transmit(&mut self, command: &ClientCommand) -> Result<(), TransmitError> {
        let frame = command.encode()?;
        self.transport.send(frame)?;
        match command.topic_change() {
            Some(TopicChange::Subscribe(topic)) => {
                self.topics.insert(topic);
            }
            Some(TopicChange::Unsubscribe(topic)) => {
                self.topics.remove(&topic);
            }
            None => {}
        }
        Ok(())
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::stores::SharedStores;
    use kelmah_shared::UserRole;
    use serde_json::{json, Value};
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockState {
        opened: Vec<String>,
        sent: Vec<String>,
        closes: usize,
        sender: Option<TransportSender>,
        fail_open: bool,
        fail_send: bool,
    }

    #[derive(Clone, Default)]
    struct MockTransport(Rc<RefCell<MockState>>);

    impl MockTransport {
        fn emit(&self, event: TransportEvent) {
            let state = self.0.borrow();
            let sender = state.sender.as_ref().expect("transport was never opened");
            sender.emit(event);
        }

        fn sent_events(&self) -> Vec<String> {
            self.0
                .borrow()
                .sent
                .iter()
                .map(|frame| {
                    let value: Value = serde_json::from_str(frame).unwrap();
                    value["event"].as_str().unwrap().to_string()
                })
                .collect()
        }

        fn open_count(&self) -> usize {
            self.0.borrow().opened.len()
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self, url: &str, events: TransportSender) -> Result<(), TransportError> {
            let mut state = self.0.borrow_mut();
            state.opened.push(url.to_string());
            state.sender = Some(events);
            if state.fail_open {
                return Err(TransportError::Open("refused".into()));
            }
            Ok(())
        }

        fn send(&mut self, frame: String) -> Result<(), TransportError> {
            let mut state = self.0.borrow_mut();
            if state.fail_send {
                return Err(TransportError::Send("broken pipe".into()));
            }
            state.sent.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closes += 1;
        }
    }

    struct Harness {
        manager: ConnectionManager<MockTransport>,
        events: TransportReceiver,
        transport: MockTransport,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SyncConfig::new("ws://localhost:5005/ws").unwrap())
        }

        fn with_config(config: SyncConfig) -> Self {
            let transport = MockTransport::default();
            let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
            let (manager, events) =
                ConnectionManager::new(config, transport.clone(), Rc::new(clock.clone()));
            Self {
                manager,
                events,
                transport,
                clock,
            }
        }

        fn pump(&mut self) {
            while let Ok(envelope) = self.events.try_recv() {
                self.manager.handle_transport_envelope(envelope);
            }
        }

        fn connect(&mut self) {
            self.manager
                .connect(Credentials::new("u1", UserRole::Worker, "secret"));
        }

        fn open(&mut self) {
            self.transport.emit(TransportEvent::Opened {
                socket_id: "sock-1".into(),
            });
            self.pump();
        }

        fn drop_connection(&mut self) {
            self.transport.emit(TransportEvent::Closed {
                reason: "server went away".into(),
            });
            self.pump();
        }

        fn advance_ms(&mut self, ms: i64) {
            self.clock.advance(chrono::Duration::milliseconds(ms));
            self.manager.fire_due_timers();
        }

        fn record(&mut self, kind: EventKind) -> Rc<RefCell<Vec<SyncEvent>>> {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = seen.clone();
            self.manager.subscribe(kind, move |event| {
                sink.borrow_mut().push(event.clone());
                Ok(())
            });
            seen
        }
    }

    fn notification_titles(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Notification(n) => Some(n.title.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_opens_with_handshake_query() {
        let mut h = Harness::new();
        h.connect();
        assert_eq!(*h.manager.state(), ConnectionState::Connecting);
        assert_eq!(
            h.transport.0.borrow().opened,
            vec!["ws://localhost:5005/ws?token=secret&userId=u1&userRole=worker".to_string()]
        );
    }

    #[test]
    fn connect_is_single_flight() {
        let mut h = Harness::new();
        h.connect();
        h.connect();
        assert_eq!(h.transport.open_count(), 1);
        h.open();
        h.connect();
        assert_eq!(h.transport.open_count(), 1);
    }

    #[test]
    fn open_joins_room_and_announces_connection() {
        let mut h = Harness::new();
        let notes = h.record(EventKind::Notification);
        h.connect();
        h.open();

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.socket_id.as_deref(), Some("sock-1"));
        assert!(snapshot.last_connected_at.is_some());
        assert_eq!(h.transport.sent_events(), vec!["join-room"]);
        assert_eq!(notification_titles(&notes.borrow()), vec!["Connected"]);
    }

    #[test]
    fn queued_intents_flush_in_order_after_join() {
        let mut h = Harness::new();
        assert_eq!(h.manager.subscribe_job("j1"), SendOutcome::Queued);
        assert_eq!(h.manager.send_message("c1", "hello", vec![]), SendOutcome::Queued);
        assert_eq!(h.manager.mark_message_read("m1", "c1"), SendOutcome::Queued);
        assert_eq!(h.manager.queue().len(), 3);

        h.connect();
        h.open();

        assert_eq!(
            h.transport.sent_events(),
            vec!["join-room", "subscribe-job", "send-message", "mark-message-read"]
        );
        assert!(h.manager.queue().is_empty());
        assert_eq!(h.manager.snapshot().topics, vec![Topic::Job("j1".into())]);
    }

    #[test]
    fn ephemeral_commands_are_dropped_offline() {
        let mut h = Harness::new();
        assert_eq!(h.manager.send_typing("c1", true), SendOutcome::Dropped);
        assert!(h.manager.queue().is_empty());
    }

    #[test]
    fn send_failure_while_connected_requeues() {
        let mut h = Harness::new();
        h.connect();
        h.open();
        h.transport.0.borrow_mut().fail_send = true;
        assert_eq!(h.manager.send_message("c1", "hi", vec![]), SendOutcome::Queued);
        assert_eq!(h.manager.send_typing("c1", true), SendOutcome::Dropped);
        assert_eq!(h.manager.queue().len(), 1);
    }

    #[test]
    fn drop_schedules_backoff_and_reconnects() {
        let mut h = Harness::new();
        let notes = h.record(EventKind::Notification);
        h.connect();
        h.open();
        h.drop_connection();

        assert_eq!(
            *h.manager.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
        h.advance_ms(1999);
        assert_eq!(h.transport.open_count(), 1);
        h.advance_ms(1);
        assert_eq!(h.transport.open_count(), 2);

        h.open();
        assert!(h.manager.is_connected());
        assert_eq!(h.manager.snapshot().reconnect_attempts, 0);
        assert_eq!(
            notification_titles(&notes.borrow()),
            vec!["Connected", "Disconnected", "Reconnected"]
        );
    }

    #[test]
    fn topics_are_resubscribed_after_reconnect() {
        let mut h = Harness::new();
        h.connect();
        h.open();
        h.manager.subscribe_job("j1");
        h.manager.subscribe_payment("t1");
        h.manager.subscribe_job("j2");
        h.manager.unsubscribe_job("j2");
        h.drop_connection();
        h.manager.send_message("c1", "queued", vec![]);
        h.advance_ms(2000);
        h.transport.0.borrow_mut().sent.clear();
        h.open();

        assert_eq!(
            h.transport.sent_events(),
            vec!["join-room", "subscribe-job", "subscribe-payment", "send-message"]
        );
    }

    #[test]
    fn reconnection_is_bounded_then_failed() {
        let mut h = Harness::new();
        let notes = h.record(EventKind::Notification);
        h.connect();
        h.open();

        // Initial drop plus three failed retries.
        h.drop_connection();
        for delay in [2000, 3000, 4500] {
            h.advance_ms(delay);
            h.drop_connection();
        }

        assert!(h.manager.state().is_failed());
        let opens = h.transport.open_count();
        assert_eq!(opens, 4);
        h.advance_ms(60_000);
        assert_eq!(h.transport.open_count(), opens);
        assert_eq!(h.manager.next_deadline(), None);

        let events = notes.borrow();
        let failed = events
            .iter()
            .find_map(|e| match e {
                SyncEvent::Notification(n) if n.title == "Connection Failed" => Some(n.clone()),
                _ => None,
            })
            .expect("failure notification");
        assert_eq!(failed.severity, Severity::Error);
        assert!(!failed.auto_hide);
    }

    #[test]
    fn connect_recovers_from_failed() {
        let mut config = SyncConfig::new("ws://localhost/ws").unwrap();
        config.reconnect.max_attempts = 0;
        let mut h = Harness::with_config(config);
        h.connect();
        h.drop_connection();
        assert!(h.manager.state().is_failed());

        h.connect();
        assert_eq!(*h.manager.state(), ConnectionState::Connecting);
        assert_eq!(h.transport.open_count(), 2);
    }

    #[test]
    fn topics_are_resubscribed_after_recovering_from_failed() {
        let mut config = SyncConfig::new("ws://localhost/ws").unwrap();
        config.reconnect.max_attempts = 0;
        let mut h = Harness::with_config(config);
        h.connect();
        h.open();
        h.manager.subscribe_job("j1");
        h.drop_connection();
        assert!(h.manager.state().is_failed());

        h.connect();
        h.transport.0.borrow_mut().sent.clear();
        h.open();

        assert_eq!(h.transport.sent_events(), vec!["join-room", "subscribe-job"]);
        assert_eq!(h.manager.snapshot().topics, vec![Topic::Job("j1".into())]);
    }

    #[test]
    fn failed_open_counts_as_attempt() {
        let mut h = Harness::new();
        h.transport.0.borrow_mut().fail_open = true;
        h.connect();
        assert_eq!(
            *h.manager.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
    }

    #[test]
    fn handshake_timeout_triggers_retry() {
        let mut h = Harness::new();
        h.connect();
        h.advance_ms(20_000);
        assert_eq!(
            *h.manager.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
        assert!(h.transport.0.borrow().closes >= 1);
    }

    #[test]
    fn heartbeat_pings_while_connected() {
        let mut h = Harness::new();
        h.connect();
        h.open();
        h.advance_ms(30_000);
        h.advance_ms(30_000);
        assert_eq!(h.transport.sent_events(), vec!["join-room", "ping", "ping"]);

        h.drop_connection();
        h.transport.0.borrow_mut().sent.clear();
        h.advance_ms(1_000);
        assert!(h.transport.sent_events().is_empty());
    }

    #[test]
    fn frames_are_decoded_and_dispatched() {
        let mut h = Harness::new();
        let online = h.record(EventKind::UserOnline);
        h.connect();
        h.open();
        h.transport.emit(TransportEvent::Frame(
            json!({"event": "user-online", "data": {"userId": "u9"}}).to_string(),
        ));
        h.transport.emit(TransportEvent::Frame("not json".into()));
        h.pump();
        assert_eq!(online.borrow().len(), 1);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut h = Harness::new();
        h.connect();
        let stale = h.transport.0.borrow().sender.clone().unwrap();
        h.manager.disconnect();
        stale.emit(TransportEvent::Opened {
            socket_id: "late".into(),
        });
        h.pump();
        assert_eq!(*h.manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_clears_everything() {
        let mut h = Harness::new();
        let changes = h.record(EventKind::ConnectionChanged);
        h.connect();
        h.open();
        h.manager.subscribe_job("j1");
        h.drop_connection();
        h.manager.send_message("c1", "lost", vec![]);

        h.manager.disconnect();
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.queued_intents, 0);
        assert!(snapshot.topics.is_empty());
        assert_eq!(h.manager.next_deadline(), None);

        let seen = changes.borrow().len();
        h.advance_ms(60_000);
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.manager.dispatcher().listener_count(EventKind::ConnectionChanged), 0);
        assert_eq!(changes.borrow().len(), seen);
    }

    #[test]
    fn disconnect_when_idle_is_a_noop() {
        let mut h = Harness::new();
        let changes = h.record(EventKind::ConnectionChanged);
        h.manager.disconnect();
        assert_eq!(*h.manager.state(), ConnectionState::Disconnected);
        assert!(changes.borrow().is_empty());
    }

    #[test]
    fn events_after_disconnect_leave_stores_unchanged() {
        let mut h = Harness::new();
        let stores = SharedStores::new();
        stores.attach(h.manager.dispatcher_mut(), Rc::new(h.clock.clone()));
        h.connect();
        h.open();
        let stale = h.transport.0.borrow().sender.clone().unwrap();
        let notifications_before = stores.notifications.borrow().clone();

        h.manager.disconnect();

        let frame = json!({
            "event": "new-message",
            "data": {
                "messageId": "m1",
                "conversationId": "c1",
                "senderId": "u2",
                "senderName": "Esi",
                "content": "Still there?",
                "timestamp": "2024-05-01T10:00:00Z"
            }
        })
        .to_string();
        stale.emit(TransportEvent::Frame(frame.clone()));
        h.pump();
        let report = h
            .manager
            .dispatcher()
            .dispatch(&SyncEvent::Server(ServerEvent::decode(&frame).unwrap()));
        h.manager.dispatcher().dispatch(&SyncEvent::Server(ServerEvent::UserOnline(
            kelmah_shared::PresenceChange {
                user_id: "u2".into(),
            },
        )));

        assert_eq!(report.delivered + report.failed, 0);
        assert!(stores.conversations.borrow().is_empty());
        assert_eq!(stores.presence.borrow().online_users().count(), 0);
        assert_eq!(*stores.notifications.borrow(), notifications_before);
    }
}
