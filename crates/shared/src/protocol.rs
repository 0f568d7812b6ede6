//! Wire protocol for the real-time channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Outbound intents are [`ClientCommand`]s, inbound events are
//! [`ServerEvent`]s; both are closed enums so a payload can only ever travel
//! under the event name it belongs to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::models::{Attachment, Credentials, MessageStatus, Severity, UserRole};

// --- Handshake ---

/// Identity carried when the channel is opened.
#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub token: String,
    pub user_id: String,
    pub user_role: UserRole,
}

impl Handshake {
    /// Query string appended to the WebSocket URL.
    pub fn to_query_string(&self) -> String {
        format!(
            "token={}&userId={}&userRole={}",
            urlencoding::encode(&self.token),
            urlencoding::encode(&self.user_id),
            urlencoding::encode(self.user_role.as_str())
        )
    }
}

impl From<&Credentials> for Handshake {
    fn from(creds: &Credentials) -> Self {
        Self {
            token: creds.auth_token.clone(),
            user_id: creds.user_id.clone(),
            user_role: creds.role,
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("user_id", &self.user_id)
            .field("user_role", &self.user_role)
            .finish_non_exhaustive()
    }
}

// --- Topics ---

/// A scoped server-side subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Job(String),
    Payment(String),
}

impl Topic {
    /// The command that (re-)establishes this subscription on the backend.
    pub fn subscribe_command(&self) -> ClientCommand {
        match self {
            Topic::Job(job_id) => ClientCommand::SubscribeJob {
                job_id: job_id.clone(),
            },
            Topic::Payment(transaction_id) => ClientCommand::SubscribePayment {
                transaction_id: transaction_id.clone(),
            },
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Job(id) => write!(f, "job:{}", id),
            Topic::Payment(id) => write!(f, "payment:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicChange {
    Subscribe(Topic),
    Unsubscribe(Topic),
}

// --- Outbound ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinRoom {
        user_id: String,
        user_role: UserRole,
        timestamp: DateTime<Utc>,
    },
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
        timestamp: DateTime<Utc>,
    },
    TypingIndicator {
        conversation_id: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    MarkMessageRead {
        message_id: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },
    SubscribeJob {
        job_id: String,
    },
    UnsubscribeJob {
        job_id: String,
    },
    SubscribePayment {
        transaction_id: String,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
}

impl ClientCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientCommand::JoinRoom { .. } => "join-room",
            ClientCommand::SendMessage { .. } => "send-message",
            ClientCommand::TypingIndicator { .. } => "typing-indicator",
            ClientCommand::MarkMessageRead { .. } => "mark-message-read",
            ClientCommand::SubscribeJob { .. } => "subscribe-job",
            ClientCommand::UnsubscribeJob { .. } => "unsubscribe-job",
            ClientCommand::SubscribePayment { .. } => "subscribe-payment",
            ClientCommand::Ping { .. } => "ping",
        }
    }

    /// Ephemeral commands are worthless once stale and are never queued.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            ClientCommand::TypingIndicator { .. } | ClientCommand::Ping { .. }
        )
    }

    /// The topic subscription change this command makes, if any.
    pub fn topic_change(&self) -> Option<TopicChange> {
        match self {
            ClientCommand::SubscribeJob { job_id } => {
                Some(TopicChange::Subscribe(Topic::Job(job_id.clone())))
            }
            ClientCommand::UnsubscribeJob { job_id } => {
                Some(TopicChange::Unsubscribe(Topic::Job(job_id.clone())))
            }
            ClientCommand::SubscribePayment { transaction_id } => {
                Some(TopicChange::Subscribe(Topic::Payment(transaction_id.clone())))
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            event: self.event_name(),
            source,
        })
    }
}

// --- Inbound payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdate {
    pub conversation_id: String,
    pub message_id: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobNotice {
    #[serde(rename = "type", default)]
    pub notice_type: String,
    pub message: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobApplicationNotice {
    #[serde(rename = "type", default)]
    pub notice_type: String,
    pub message: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub applicant_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusNotice {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotice {
    #[serde(rename = "type", default)]
    pub notice_type: String,
    pub message: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusNotice {
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub auto_hide: Option<bool>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceNotice {
    pub message: String,
    #[serde(default)]
    pub actions: Vec<Value>,
}

// --- Inbound ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(IncomingMessage),
    MessageStatus(MessageStatusUpdate),
    TypingIndicator(TypingUpdate),
    JobNotification(JobNotice),
    JobApplication(JobApplicationNotice),
    JobStatusUpdate(JobStatusNotice),
    PaymentNotification(PaymentNotice),
    PaymentStatusUpdate(PaymentStatusNotice),
    #[serde(rename = "bid:received")]
    BidReceived(Value),
    #[serde(rename = "bid:accepted")]
    BidAccepted(Value),
    #[serde(rename = "bid:rejected")]
    BidRejected(Value),
    #[serde(rename = "bid:withdrawn")]
    BidWithdrawn(Value),
    #[serde(rename = "bid:expired")]
    BidExpired(Value),
    UserOnline(PresenceChange),
    UserOffline(PresenceChange),
    OnlineUsers(OnlineUsers),
    SystemNotification(SystemNotice),
    MaintenanceNotice(MaintenanceNotice),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageStatus(_) => "message-status",
            ServerEvent::TypingIndicator(_) => "typing-indicator",
            ServerEvent::JobNotification(_) => "job-notification",
            ServerEvent::JobApplication(_) => "job-application",
            ServerEvent::JobStatusUpdate(_) => "job-status-update",
            ServerEvent::PaymentNotification(_) => "payment-notification",
            ServerEvent::PaymentStatusUpdate(_) => "payment-status-update",
            ServerEvent::BidReceived(_) => "bid:received",
            ServerEvent::BidAccepted(_) => "bid:accepted",
            ServerEvent::BidRejected(_) => "bid:rejected",
            ServerEvent::BidWithdrawn(_) => "bid:withdrawn",
            ServerEvent::BidExpired(_) => "bid:expired",
            ServerEvent::UserOnline(_) => "user-online",
            ServerEvent::UserOffline(_) => "user-offline",
            ServerEvent::OnlineUsers(_) => "online-users",
            ServerEvent::SystemNotification(_) => "system-notification",
            ServerEvent::MaintenanceNotice(_) => "maintenance-notice",
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            event: self.event_name(),
            source,
        })
    }
}
