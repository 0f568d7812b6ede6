//! Conversation store: per-conversation message history, unread counts and
//! who is currently typing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use kelmah_shared::{ChatMessage, MessageStatus};

/// Only the most recent messages of a conversation are kept.
pub const MAX_MESSAGES_PER_CONVERSATION: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct TypingEntry {
    pub user_name: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    /// In arrival order.
    pub messages: Vec<ChatMessage>,
    pub participants: BTreeSet<String>,
    pub unread_count: usize,
    /// Keyed by user id.
    pub typing: BTreeMap<String, TypingEntry>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Conversation {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            participants: BTreeSet::new(),
            unread_count: 0,
            typing: BTreeMap::new(),
            last_activity: None,
        }
    }

    /// Append unless a message with the same id is already present.
    /// Returns false for duplicates.
    fn push_message(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.participants.insert(message.sender_id.clone());
        self.last_activity = Some(
            self.last_activity
                .map_or(message.timestamp, |last| last.max(message.timestamp)),
        );
        self.messages.push(message);
        true
    }

    fn truncate(&mut self) {
        if self.messages.len() > MAX_MESSAGES_PER_CONVERSATION {
            let excess = self.messages.len() - MAX_MESSAGES_PER_CONVERSATION;
            self.messages.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationAction {
    AppendMessage {
        conversation_id: String,
        message: ChatMessage,
    },
    /// History load: appends without touching unread counts.
    BulkAppend {
        conversation_id: String,
        messages: Vec<ChatMessage>,
    },
    MarkRead(String),
    SetActive(Option<String>),
    SetTyping {
        conversation_id: String,
        user_id: String,
        user_name: String,
        is_typing: bool,
        now: DateTime<Utc>,
    },
    ClearTyping(String),
    ExpireTyping {
        now: DateTime<Utc>,
        ttl: Duration,
    },
    UpdateMessageStatus {
        conversation_id: String,
        message_id: String,
        status: MessageStatus,
        now: DateTime<Utc>,
    },
    SetParticipants {
        conversation_id: String,
        participants: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    active: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reduce(mut self, action: ConversationAction) -> Self {
        self.apply(action);
        self
    }

    pub fn apply(&mut self, action: ConversationAction) {
        match action {
            ConversationAction::AppendMessage {
                conversation_id,
                message,
            } => self.append_message(&conversation_id, message),
            ConversationAction::BulkAppend {
                conversation_id,
                messages,
            } => self.bulk_append(&conversation_id, messages),
            ConversationAction::MarkRead(id) => self.mark_conversation_read(&id),
            ConversationAction::SetActive(id) => self.set_active_conversation(id),
            ConversationAction::SetTyping {
                conversation_id,
                user_id,
                user_name,
                is_typing,
                now,
            } => self.set_typing(&conversation_id, &user_id, &user_name, is_typing, now),
            ConversationAction::ClearTyping(id) => self.clear_typing(&id),
            ConversationAction::ExpireTyping { now, ttl } => self.expire_typing(now, ttl),
            ConversationAction::UpdateMessageStatus {
                conversation_id,
                message_id,
                status,
                now,
            } => self.update_message_status(&conversation_id, &message_id, status, now),
            ConversationAction::SetParticipants {
                conversation_id,
                participants,
            } => self.set_participants(&conversation_id, participants),
        }
    }

    fn entry(&mut self, conversation_id: &str) -> &mut Conversation {
        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id))
    }

    pub fn append_message(&mut self, conversation_id: &str, message: ChatMessage) {
        let is_active = self.active.as_deref() == Some(conversation_id);
        let conversation = self.entry(conversation_id);
        if conversation.push_message(message) {
            if !is_active {
                conversation.unread_count += 1;
            }
            conversation.truncate();
        }
    }

    pub fn bulk_append(&mut self, conversation_id: &str, messages: Vec<ChatMessage>) {
        let conversation = self.entry(conversation_id);
        for message in messages {
            conversation.push_message(message);
        }
        conversation.truncate();
    }

    pub fn mark_conversation_read(&mut self, conversation_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.unread_count = 0;
        }
    }

    /// Opening a conversation also clears its unread count.
    pub fn set_active_conversation(&mut self, conversation_id: Option<String>) {
        if let Some(id) = conversation_id.as_deref() {
            self.mark_conversation_read(id);
        }
        self.active = conversation_id;
    }

    pub fn set_typing(
        &mut self,
        conversation_id: &str,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
        now: DateTime<Utc>,
    ) {
        if is_typing {
            self.entry(conversation_id).typing.insert(
                user_id.to_string(),
                TypingEntry {
                    user_name: user_name.to_string(),
                    since: now,
                },
            );
        } else if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.typing.remove(user_id);
        }
    }

    pub fn clear_typing(&mut self, conversation_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.typing.clear();
        }
    }

    /// Drop typing indicators older than `ttl`. The store never calls this
    /// on its own.
    pub fn expire_typing(&mut self, now: DateTime<Utc>, ttl: Duration) {
        for conversation in self.conversations.values_mut() {
            conversation.typing.retain(|_, entry| now - entry.since < ttl);
        }
    }

    pub fn update_message_status(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
        now: DateTime<Utc>,
    ) {
        let message = self
            .conversations
            .get_mut(conversation_id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == message_id));
        if let Some(message) = message {
            message.status = status;
            message.updated_at = Some(now);
        }
    }

    pub fn set_participants(&mut self, conversation_id: &str, participants: Vec<String>) {
        self.entry(conversation_id).participants = participants.into_iter().collect();
    }

    // --- Selectors ---

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Display names of everyone typing in a conversation.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<&str> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.typing.values().map(|e| e.user_name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn total_unread(&self) -> usize {
        self.conversations.values().map(|c| c.unread_count).sum()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
