//! Derived state fed by the event dispatcher.
//!
//! Each store is a plain value with pure `reduce` transitions. [`SharedStores`]
//! puts them behind `Rc<RefCell<_>>` so UI code can read them while the
//! dispatcher listeners installed by [`SharedStores::attach`] write them.

pub mod conversations;
pub mod notifications;
pub mod presence;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;
use kelmah_shared::{ChatMessage, MessageStatus, ServerEvent};

use crate::clock::Clock;
use crate::ws::{EventDispatcher, EventKind, ListenerId, SyncEvent};

pub use conversations::{
    Conversation, ConversationAction, ConversationStore, TypingEntry, MAX_MESSAGES_PER_CONVERSATION,
};
pub use notifications::{notification_for, NotificationAction, NotificationStore, MAX_NOTIFICATIONS};
pub use presence::{PresenceAction, PresenceStore};

/// Listener registrations made by [`SharedStores::attach`].
#[derive(Debug, Clone, Default)]
pub struct StoreBindings {
    listeners: Vec<(EventKind, ListenerId)>,
}

impl StoreBindings {
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Remove every listener from `dispatcher`.
    pub fn detach(self, dispatcher: &mut EventDispatcher) {
        for (kind, id) in self.listeners {
            dispatcher.unsubscribe(kind, id);
        }
    }
}

#[derive(Clone, Default)]
pub struct SharedStores {
    pub notifications: Rc<RefCell<NotificationStore>>,
    pub conversations: Rc<RefCell<ConversationStore>>,
    pub presence: Rc<RefCell<PresenceStore>>,
}

impl SharedStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listeners that fold dispatched events into the stores.
    pub fn attach(&self, dispatcher: &mut EventDispatcher, clock: Rc<dyn Clock>) -> StoreBindings {
        let mut bindings = StoreBindings::default();

        // Conversations
        let conversations = self.conversations.clone();
        let id = dispatcher.subscribe(EventKind::NewMessage, move |event| {
            let SyncEvent::Server(ServerEvent::NewMessage(msg)) = event else {
                return Ok(());
            };
            let message = ChatMessage {
                id: msg.message_id.clone(),
                sender_id: msg.sender_id.clone(),
                sender_name: (!msg.sender_name.is_empty()).then(|| msg.sender_name.clone()),
                content: msg.content.clone(),
                timestamp: msg.timestamp,
                status: MessageStatus::Delivered,
                attachments: msg.attachments.clone(),
                updated_at: None,
            };
            conversations
                .try_borrow_mut()
                .map_err(|_| anyhow!("conversation store is busy"))?
                .append_message(&msg.conversation_id, message);
            Ok(())
        });
        bindings.listeners.push((EventKind::NewMessage, id));

        let conversations = self.conversations.clone();
        let now = clock.clone();
        let id = dispatcher.subscribe(EventKind::MessageStatus, move |event| {
            let SyncEvent::Server(ServerEvent::MessageStatus(update)) = event else {
                return Ok(());
            };
            conversations
                .try_borrow_mut()
                .map_err(|_| anyhow!("conversation store is busy"))?
                .update_message_status(
                    &update.conversation_id,
                    &update.message_id,
                    update.status,
                    now.now(),
                );
            Ok(())
        });
        bindings.listeners.push((EventKind::MessageStatus, id));

        let conversations = self.conversations.clone();
        let now = clock.clone();
        let id = dispatcher.subscribe(EventKind::TypingIndicator, move |event| {
            let SyncEvent::Server(ServerEvent::TypingIndicator(typing)) = event else {
                return Ok(());
            };
            conversations
                .try_borrow_mut()
                .map_err(|_| anyhow!("conversation store is busy"))?
                .set_typing(
                    &typing.conversation_id,
                    &typing.user_id,
                    &typing.user_name,
                    typing.is_typing,
                    now.now(),
                );
            Ok(())
        });
        bindings.listeners.push((EventKind::TypingIndicator, id));

        // Presence
        for kind in [EventKind::UserOnline, EventKind::UserOffline, EventKind::OnlineUsers] {
            let presence = self.presence.clone();
            let now = clock.clone();
            let id = dispatcher.subscribe(kind, move |event| {
                let mut presence = presence
                    .try_borrow_mut()
                    .map_err(|_| anyhow!("presence store is busy"))?;
                match event {
                    SyncEvent::Server(ServerEvent::UserOnline(change)) => {
                        presence.set_online(&change.user_id, now.now())
                    }
                    SyncEvent::Server(ServerEvent::UserOffline(change)) => {
                        presence.set_offline(&change.user_id, now.now())
                    }
                    SyncEvent::Server(ServerEvent::OnlineUsers(list)) => {
                        presence.bulk_sync(list.users.clone(), now.now())
                    }
                    _ => {}
                }
                Ok(())
            });
            bindings.listeners.push((kind, id));
        }

        // Notifications: locally synthesized ones plus every notifying server event.
        let notifications = self.notifications.clone();
        let id = dispatcher.subscribe(EventKind::Notification, move |event| {
            if let SyncEvent::Notification(notification) = event {
                notifications
                    .try_borrow_mut()
                    .map_err(|_| anyhow!("notification store is busy"))?
                    .add(notification.clone());
            }
            Ok(())
        });
        bindings.listeners.push((EventKind::Notification, id));

        for kind in EventKind::NOTIFYING {
            let notifications = self.notifications.clone();
            let now = clock.clone();
            let id = dispatcher.subscribe(kind, move |event| {
                let SyncEvent::Server(server) = event else {
                    return Ok(());
                };
                if let Some(notification) = notification_for(server, now.now()) {
                    notifications
                        .try_borrow_mut()
                        .map_err(|_| anyhow!("notification store is busy"))?
                        .add(notification);
                }
                Ok(())
            });
            bindings.listeners.push((kind, id));
        }

        crate::log_debug!("Attached {} store listener(s)", bindings.len());
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::DateTime;
    use kelmah_shared::{IncomingMessage, MessageStatusUpdate, OnlineUsers, TypingUpdate};

    fn setup() -> (SharedStores, EventDispatcher, ManualClock) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let stores = SharedStores::new();
        let mut dispatcher = EventDispatcher::new();
        stores.attach(&mut dispatcher, Rc::new(clock.clone()));
        (stores, dispatcher, clock)
    }

    fn new_message(conversation: &str, id: &str) -> SyncEvent {
        SyncEvent::Server(ServerEvent::NewMessage(IncomingMessage {
            message_id: id.into(),
            conversation_id: conversation.into(),
            sender_id: "u2".into(),
            sender_name: "Esi".into(),
            content: "Can you start tomorrow?".into(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            attachments: vec![],
        }))
    }

    #[test]
    fn new_message_lands_as_delivered_and_unread() {
        let (stores, dispatcher, _) = setup();
        dispatcher.dispatch(&new_message("c1", "m1"));

        let conversations = stores.conversations.borrow();
        let c = conversations.get("c1").unwrap();
        assert_eq!(c.messages.len(), 1);
        assert_eq!(c.messages[0].status, MessageStatus::Delivered);
        assert_eq!(c.messages[0].sender_name.as_deref(), Some("Esi"));
        assert_eq!(c.unread_count, 1);

        let notifications = stores.notifications.borrow();
        assert_eq!(notifications.unread_count(), 1);
        assert_eq!(notifications.get("m1").unwrap().title, "New message from Esi");
    }

    #[test]
    fn status_and_typing_events_update_conversations() {
        let (stores, dispatcher, clock) = setup();
        dispatcher.dispatch(&new_message("c1", "m1"));
        clock.advance(chrono::Duration::seconds(30));
        dispatcher.dispatch(&SyncEvent::Server(ServerEvent::MessageStatus(
            MessageStatusUpdate {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                status: MessageStatus::Read,
            },
        )));
        dispatcher.dispatch(&SyncEvent::Server(ServerEvent::TypingIndicator(TypingUpdate {
            conversation_id: "c1".into(),
            user_id: "u2".into(),
            user_name: "Esi".into(),
            is_typing: true,
        })));

        let conversations = stores.conversations.borrow();
        let message = &conversations.get("c1").unwrap().messages[0];
        assert_eq!(message.status, MessageStatus::Read);
        assert_eq!(message.updated_at, Some(clock.now()));
        assert_eq!(conversations.typing_users("c1"), vec!["Esi"]);
    }

    #[test]
    fn presence_events_feed_the_presence_store() {
        let (stores, dispatcher, _) = setup();
        dispatcher.dispatch(&SyncEvent::Server(ServerEvent::OnlineUsers(OnlineUsers {
            users: vec!["u1".into(), "u2".into()],
        })));
        dispatcher.dispatch(&SyncEvent::Server(ServerEvent::UserOffline(
            kelmah_shared::PresenceChange {
                user_id: "u1".into(),
            },
        )));
        let presence = stores.presence.borrow();
        assert!(!presence.is_online("u1"));
        assert!(presence.is_online("u2"));
    }

    #[test]
    fn busy_store_is_reported_not_panicked() {
        let (stores, dispatcher, _) = setup();
        let _guard = stores.conversations.borrow_mut();
        let report = dispatcher.dispatch(&new_message("c1", "m1"));
        assert_eq!(report.failed, 1);
        // The notification listener still ran.
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn detach_removes_every_listener() {
        let stores = SharedStores::new();
        let mut dispatcher = EventDispatcher::new();
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new(chrono::Utc::now()));
        let bindings = stores.attach(&mut dispatcher, clock);
        assert!(!bindings.is_empty());
        bindings.detach(&mut dispatcher);
        dispatcher.dispatch(&new_message("c1", "m1"));
        assert!(stores.conversations.borrow().is_empty());
    }
}
