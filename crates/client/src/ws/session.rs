//! Async driver for a [`ConnectionManager`].
//!
//! [`SyncSession::run`] owns the manager on a single thread and wakes up for
//! three things: a command from a [`SyncHandle`], a transport event, or the
//! next timer deadline. The future is `!Send`; run it on a `LocalSet`
//! natively or with `spawn_local` in the browser.

use std::rc::Rc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_channel::oneshot;
use futures_util::{FutureExt, StreamExt};
use kelmah_shared::{Attachment, ClientCommand, Credentials};
use thiserror::Error;

use super::connection::{Transport, TransportEnvelope, TransportReceiver};
use super::dispatcher::{EventKind, ListenerId, SyncEvent};
use super::manager::{ConnectionManager, ConnectionSnapshot, SendOutcome};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::stores::{SharedStores, StoreBindings};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("the sync session has stopped")]
    SessionClosed,
}

type BoxedListener = Box<dyn Fn(&SyncEvent) -> anyhow::Result<()>>;

enum Outbound {
    Raw(ClientCommand),
    Message {
        conversation_id: String,
        content: String,
        attachments: Vec<Attachment>,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    MarkRead {
        message_id: String,
        conversation_id: String,
    },
    SubscribeJob(String),
    UnsubscribeJob(String),
    SubscribePayment(String),
}

enum SessionCommand {
    Connect(Credentials),
    Disconnect,
    Shutdown,
    Send(Outbound, oneshot::Sender<SendOutcome>),
    Subscribe {
        kind: EventKind,
        listener: BoxedListener,
        reply: oneshot::Sender<ListenerId>,
    },
    Unsubscribe(EventKind, ListenerId),
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
    AttachStores(SharedStores, oneshot::Sender<StoreBindings>),
    DetachStores(StoreBindings),
}

/// Cloneable handle for talking to a running [`SyncSession`].
#[derive(Clone)]
pub struct SyncHandle {
    sender: UnboundedSender<SessionCommand>,
}

impl SyncHandle {
    fn post(&self, command: SessionCommand) -> Result<(), SyncError> {
        self.sender
            .unbounded_send(command)
            .map_err(|_| SyncError::SessionClosed)
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> Result<R, SyncError> {
        let (reply, response) = oneshot::channel();
        self.post(build(reply))?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }

    pub fn connect(&self, credentials: Credentials) -> Result<(), SyncError> {
        self.post(SessionCommand::Connect(credentials))
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.post(SessionCommand::Disconnect)
    }

    /// Disconnect and stop the session loop.
    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.post(SessionCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn send(&self, command: ClientCommand) -> Result<SendOutcome, SyncError> {
        self.request(|reply| SessionCommand::Send(Outbound::Raw(command), reply))
            .await
    }

    pub async fn send_message(
        &self,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::Message {
            conversation_id: conversation_id.into(),
            content: content.into(),
            attachments,
        };
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    pub async fn send_typing(
        &self,
        conversation_id: impl Into<String>,
        is_typing: bool,
    ) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::Typing {
            conversation_id: conversation_id.into(),
            is_typing,
        };
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    pub async fn mark_message_read(
        &self,
        message_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::MarkRead {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        };
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    pub async fn subscribe_job(&self, job_id: impl Into<String>) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::SubscribeJob(job_id.into());
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    pub async fn unsubscribe_job(&self, job_id: impl Into<String>) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::UnsubscribeJob(job_id.into());
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    pub async fn subscribe_payment(
        &self,
        transaction_id: impl Into<String>,
    ) -> Result<SendOutcome, SyncError> {
        let outbound = Outbound::SubscribePayment(transaction_id.into());
        self.request(|reply| SessionCommand::Send(outbound, reply)).await
    }

    /// Register an event listener on the running session.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        listener: impl Fn(&SyncEvent) -> anyhow::Result<()> + 'static,
    ) -> Result<ListenerId, SyncError> {
        let listener: BoxedListener = Box::new(listener);
        self.request(|reply| SessionCommand::Subscribe {
            kind,
            listener,
            reply,
        })
        .await
    }

    pub fn unsubscribe(&self, kind: EventKind, id: ListenerId) -> Result<(), SyncError> {
        self.post(SessionCommand::Unsubscribe(kind, id))
    }

    pub async fn snapshot(&self) -> Result<ConnectionSnapshot, SyncError> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Wire `stores` into the running session's dispatcher.
    ///
    /// `disconnect` drops every listener, so call this again after
    /// reconnecting a session that was explicitly disconnected.
    pub async fn attach_stores(&self, stores: &SharedStores) -> Result<StoreBindings, SyncError> {
        let stores = stores.clone();
        self.request(|reply| SessionCommand::AttachStores(stores, reply))
            .await
    }

    pub fn detach_stores(&self, bindings: StoreBindings) -> Result<(), SyncError> {
        self.post(SessionCommand::DetachStores(bindings))
    }
}

/// What woke the session loop.
enum Wake {
    Command(Option<SessionCommand>),
    Transport(Option<TransportEnvelope>),
    Timer,
}

pub struct SyncSession<T: Transport> {
    manager: ConnectionManager<T>,
    transport_events: TransportReceiver,
    commands: UnboundedReceiver<SessionCommand>,
}

impl<T: Transport + 'static> SyncSession<T> {
    pub fn new(config: SyncConfig, transport: T, clock: Rc<dyn Clock>) -> (Self, SyncHandle) {
        let (manager, transport_events) = ConnectionManager::new(config, transport, clock);
        let (sender, commands) = unbounded();
        let session = Self {
            manager,
            transport_events,
            commands,
        };
        (session, SyncHandle { sender })
    }

    /// Direct access before the loop starts, e.g. to attach stores.
    pub fn manager_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.manager
    }

    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    /// Run until [`SyncHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            let wake = {
                let timer = sleep_or_wait(self.manager.time_until_next_timer()).fuse();
                futures_util::pin_mut!(timer);
                futures_util::select! {
                    command = self.commands.next() => Wake::Command(command),
                    envelope = self.transport_events.next() => Wake::Transport(envelope),
                    _ = timer => Wake::Timer,
                }
            };

            match wake {
                Wake::Command(Some(SessionCommand::Shutdown)) => {
                    crate::log_info!("Sync session shutting down");
                    self.manager.disconnect();
                    return;
                }
                Wake::Command(Some(command)) => self.apply(command),
                Wake::Command(None) => {
                    crate::log_info!("All sync handles dropped, closing session");
                    self.manager.disconnect();
                    return;
                }
                Wake::Transport(Some(envelope)) => self.manager.handle_transport_envelope(envelope),
                // The manager holds a sender, so this stream never ends while we run.
                Wake::Transport(None) => return,
                Wake::Timer => self.manager.fire_due_timers(),
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current thread's local executor.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn spawn_local(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_local(self.run())
    }

    /// Spawn [`run`](Self::run) on the browser's microtask queue.
    #[cfg(target_arch = "wasm32")]
    pub fn spawn_local(self) {
        wasm_bindgen_futures::spawn_local(self.run());
    }

    fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect(credentials) => self.manager.connect(credentials),
            SessionCommand::Disconnect => self.manager.disconnect(),
            SessionCommand::Shutdown => {}
            SessionCommand::Send(outbound, reply) => {
                let outcome = match outbound {
                    Outbound::Raw(command) => self.manager.send(command),
                    Outbound::Message {
                        conversation_id,
                        content,
                        attachments,
                    } => self.manager.send_message(conversation_id, content, attachments),
                    Outbound::Typing {
                        conversation_id,
                        is_typing,
                    } => self.manager.send_typing(conversation_id, is_typing),
                    Outbound::MarkRead {
                        message_id,
                        conversation_id,
                    } => self.manager.mark_message_read(message_id, conversation_id),
                    Outbound::SubscribeJob(job_id) => self.manager.subscribe_job(job_id),
                    Outbound::UnsubscribeJob(job_id) => self.manager.unsubscribe_job(job_id),
                    Outbound::SubscribePayment(id) => self.manager.subscribe_payment(id),
                };
                let _ = reply.send(outcome);
            }
            SessionCommand::Subscribe {
                kind,
                listener,
                reply,
            } => {
                let id = self.manager.subscribe(kind, move |event| listener(event));
                let _ = reply.send(id);
            }
            SessionCommand::Unsubscribe(kind, id) => self.manager.unsubscribe(kind, id),
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.manager.snapshot());
            }
            SessionCommand::AttachStores(stores, reply) => {
                let clock = self.manager.clock();
                let bindings = stores.attach(self.manager.dispatcher_mut(), clock);
                crate::log_debug!("Attached {} store listeners", bindings.len());
                let _ = reply.send(bindings);
            }
            SessionCommand::DetachStores(bindings) => {
                bindings.detach(self.manager.dispatcher_mut());
            }
        }
    }
}

async fn sleep_or_wait(delay: Option<Duration>) {
    match delay {
        Some(delay) => sleep(delay).await,
        None => futures_util::future::pending::<()>().await,
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep(delay: Duration) {
    gloo_timers::future::sleep(delay).await;
}
