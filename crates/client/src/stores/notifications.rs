//! Notification store: the newest-first list shown in the notification
//! centre, its unread badge count and the user's delivery settings.
//!
//! `unread_count` always equals the number of entries with `read == false`.

use chrono::{DateTime, Utc};
use kelmah_shared::{
    Notification, NotificationKind, NotificationSettings, NotificationSettingsPatch, ServerEvent,
    Severity,
};

/// Oldest entries are evicted beyond this many.
pub const MAX_NOTIFICATIONS: usize = 100;

/// Longest message preview carried by a chat notification.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationAction {
    Add(Notification),
    MarkRead(String),
    MarkAllRead,
    Remove(String),
    Clear,
    UpdateSettings(NotificationSettingsPatch),
    /// Drop everything older than the cutoff.
    PruneOlderThan(DateTime<Utc>),
    /// Clear everything except settings (logout).
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationStore {
    /// Newest first.
    notifications: Vec<Notification>,
    unread_count: usize,
    settings: NotificationSettings,
    last_notification_at: Option<DateTime<Utc>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure transition: consume the old state, return the new one.
    pub fn reduce(mut self, action: NotificationAction) -> Self {
        self.apply(action);
        self
    }

    pub fn apply(&mut self, action: NotificationAction) {
        match action {
            NotificationAction::Add(notification) => self.add(notification),
            NotificationAction::MarkRead(id) => self.mark_read(&id),
            NotificationAction::MarkAllRead => self.mark_all_read(),
            NotificationAction::Remove(id) => self.remove(&id),
            NotificationAction::Clear => self.clear(),
            NotificationAction::UpdateSettings(patch) => self.update_settings(&patch),
            NotificationAction::PruneOlderThan(cutoff) => self.prune_older_than(cutoff),
            NotificationAction::Reset => self.reset(),
        }
    }

    pub fn add(&mut self, notification: Notification) {
        if !notification.read {
            self.unread_count += 1;
        }
        self.last_notification_at = Some(notification.timestamp);
        self.notifications.insert(0, notification);

        while self.notifications.len() > MAX_NOTIFICATIONS {
            if let Some(evicted) = self.notifications.pop() {
                if !evicted.read {
                    self.unread_count -= 1;
                }
            }
        }
    }

    pub fn mark_read(&mut self, id: &str) {
        for notification in self.notifications.iter_mut().filter(|n| n.id == id) {
            if !notification.read {
                notification.read = true;
                self.unread_count -= 1;
            }
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.notifications {
            notification.read = true;
        }
        self.unread_count = 0;
    }

    pub fn remove(&mut self, id: &str) {
        let unread_removed = self
            .notifications
            .iter()
            .filter(|n| n.id == id && !n.read)
            .count();
        self.notifications.retain(|n| n.id != id);
        self.unread_count -= unread_removed;
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
    }

    pub fn update_settings(&mut self, patch: &NotificationSettingsPatch) {
        self.settings.merge(patch);
    }

    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) {
        self.notifications.retain(|n| n.timestamp >= cutoff);
        self.unread_count = self.notifications.iter().filter(|n| !n.read).count();
    }

    pub fn reset(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
        self.last_notification_at = None;
    }

    // --- Selectors ---

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    pub fn last_notification_at(&self) -> Option<DateTime<Utc>> {
        self.last_notification_at
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn unread(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter().filter(|n| !n.read)
    }

    pub fn by_kind(&self, kind: NotificationKind) -> impl Iterator<Item = &Notification> {
        self.notifications.iter().filter(move |n| n.kind == kind)
    }
}

/// Turn an inbound event into the notification the user should see, if any.
///
/// Status-only events (message status, typing, presence, payment status)
/// and bid events produce nothing here; they are still dispatched.
pub fn notification_for(event: &ServerEvent, now: DateTime<Utc>) -> Option<Notification> {
    let notification = match event {
        ServerEvent::NewMessage(msg) => {
            let mut preview: String = msg.content.chars().take(PREVIEW_CHARS).collect();
            if msg.content.chars().count() > PREVIEW_CHARS {
                preview.push_str("...");
            }
            Notification::new(
                NotificationKind::Message,
                format!("New message from {}", msg.sender_name),
                preview,
                Severity::Info,
                now,
            )
            .with_id(msg.message_id.clone())
            .with_metadata("conversationId", msg.conversation_id.clone())
            .with_metadata("senderId", msg.sender_id.clone())
            .with_metadata("timestamp", msg.timestamp.to_rfc3339())
        }
        ServerEvent::JobNotification(job) => {
            let (title, severity) = match job.notice_type.as_str() {
                "new-job" => ("New Job Available", Severity::Info),
                "job-match" => ("Perfect Job Match!", Severity::Success),
                "job-deadline" => ("Job Deadline Reminder", Severity::Warning),
                _ => ("Job Update", Severity::Info),
            };
            Notification::new(NotificationKind::Job, title, job.message.clone(), severity, now)
                .with_metadata("jobId", job.job_id.clone())
                .with_metadata("jobTitle", job.job_title.clone())
                .with_metadata("clientName", job.client_name.clone())
        }
        ServerEvent::JobApplication(app) => {
            let title = if app.notice_type == "new-application" {
                "New Job Application"
            } else {
                "Application Update"
            };
            Notification::new(
                NotificationKind::JobApplication,
                title,
                app.message.clone(),
                Severity::Info,
                now,
            )
            .with_metadata("applicationId", app.application_id.clone())
            .with_metadata("jobId", app.job_id.clone())
            .with_metadata("applicantName", app.applicant_name.clone())
        }
        ServerEvent::JobStatusUpdate(update) => {
            let severity = match update.status.as_str() {
                "accepted" | "completed" => Severity::Success,
                "rejected" => Severity::Error,
                "cancelled" => Severity::Warning,
                _ => Severity::Info,
            };
            Notification::new(
                NotificationKind::JobStatus,
                format!("Job {}", capitalize(&update.status)),
                update.message.clone(),
                severity,
                now,
            )
            .with_metadata("jobId", update.job_id.clone())
            .with_metadata("status", update.status.clone())
        }
        ServerEvent::PaymentNotification(payment) => {
            let (title, severity) = match payment.notice_type.as_str() {
                "payment-received" => ("Payment Received", Severity::Success),
                "payment-sent" => ("Payment Sent", Severity::Info),
                "payment-failed" => ("Payment Failed", Severity::Error),
                _ => ("Payment Update", Severity::Info),
            };
            let notification = Notification::new(
                NotificationKind::Payment,
                title,
                payment.message.clone(),
                severity,
                now,
            )
            .with_metadata("transactionId", payment.transaction_id.clone())
            .with_metadata("amount", payment.amount)
            .with_metadata("paymentMethod", payment.payment_method.clone());
            if payment.notice_type == "payment-failed" {
                notification.persistent()
            } else {
                notification
            }
        }
        ServerEvent::SystemNotification(notice) => {
            let mut notification = Notification::new(
                NotificationKind::System,
                notice.title.clone(),
                notice.message.clone(),
                notice.severity.unwrap_or_default(),
                now,
            );
            notification.auto_hide = notice.auto_hide != Some(false);
            notification.metadata = notice.metadata.clone().unwrap_or_default();
            notification
        }
        ServerEvent::MaintenanceNotice(notice) => Notification::new(
            NotificationKind::System,
            "Maintenance Notice",
            notice.message.clone(),
            Severity::Info,
            now,
        )
        .persistent()
        .with_actions(notice.actions.clone()),
        ServerEvent::MessageStatus(_)
        | ServerEvent::TypingIndicator(_)
        | ServerEvent::PaymentStatusUpdate(_)
        | ServerEvent::BidReceived(_)
        | ServerEvent::BidAccepted(_)
        | ServerEvent::BidRejected(_)
        | ServerEvent::BidWithdrawn(_)
        | ServerEvent::BidExpired(_)
        | ServerEvent::UserOnline(_)
        | ServerEvent::UserOffline(_)
        | ServerEvent::OnlineUsers(_) => return None,
    };
    Some(notification)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kelmah_shared::{
        IncomingMessage, JobStatusNotice, MaintenanceNotice, PaymentNotice, PaymentStatusNotice,
        SystemNotice,
    };
    use proptest::prelude::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn note(id: &str) -> Notification {
        Notification::new(NotificationKind::System, "t", "m", Severity::Info, t0()).with_id(id)
    }

    #[test]
    fn add_prepends_and_counts_unread() {
        let store = NotificationStore::new()
            .reduce(NotificationAction::Add(note("a")))
            .reduce(NotificationAction::Add(note("b")));
        let ids: Vec<_> = store.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.unread_count(), 2);
        assert_eq!(store.last_notification_at(), Some(t0()));
    }

    #[test]
    fn already_read_notifications_do_not_count() {
        let mut read = note("a");
        read.read = true;
        let store = NotificationStore::new().reduce(NotificationAction::Add(read));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn eviction_adjusts_unread_count() {
        let mut store = NotificationStore::new();
        for i in 0..MAX_NOTIFICATIONS {
            store.add(note(&i.to_string()));
        }
        store.mark_read("1");
        assert_eq!(store.unread_count(), 99);

        // Evicts "0" (unread).
        store.add(note("new"));
        assert_eq!(store.len(), MAX_NOTIFICATIONS);
        assert_eq!(store.unread_count(), 99);
        assert!(store.get("0").is_none());

        // Evicts "1" (read).
        store.add(note("newer"));
        assert_eq!(store.unread_count(), 100);
        assert!(store.get("1").is_none());
    }

    #[test]
    fn mark_remove_and_clear() {
        let mut store = NotificationStore::new();
        store.add(note("a"));
        store.add(note("b"));
        store.add(note("c"));
        store.mark_read("a");
        store.mark_read("a");
        assert_eq!(store.unread_count(), 2);
        store.remove("b");
        store.remove("missing");
        assert_eq!(store.unread_count(), 1);
        store.mark_all_read();
        assert_eq!(store.unread().count(), 0);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn prune_and_reset_keep_settings() {
        let mut store = NotificationStore::new();
        let mut old = note("old");
        old.timestamp = t0() - Duration::days(8);
        store.add(old);
        store.add(note("fresh"));
        store.update_settings(&NotificationSettingsPatch {
            sms: Some(true),
            ..Default::default()
        });

        store.prune_older_than(t0() - Duration::days(7));
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);

        store.reset();
        assert!(store.is_empty());
        assert!(store.settings().sms);
        assert!(store.settings().desktop);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, bool),
        MarkRead(u8),
        MarkAllRead,
        Remove(u8),
        Clear,
        Prune(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0u8..20, any::<bool>()).prop_map(|(id, read)| Op::Add(id, read)),
            3 => (0u8..20).prop_map(Op::MarkRead),
            1 => Just(Op::MarkAllRead),
            2 => (0u8..20).prop_map(Op::Remove),
            1 => Just(Op::Clear),
            1 => (0i64..200).prop_map(Op::Prune),
        ]
    }

    proptest! {
        #[test]
        fn unread_count_matches_unread_entries(ops in proptest::collection::vec(op(), 0..300)) {
            let mut store = NotificationStore::new();
            for (step, op) in ops.into_iter().enumerate() {
                let action = match op {
                    Op::Add(id, read) => {
                        let mut n = note(&id.to_string());
                        n.read = read;
                        n.timestamp = t0() + Duration::seconds(step as i64);
                        NotificationAction::Add(n)
                    }
                    Op::MarkRead(id) => NotificationAction::MarkRead(id.to_string()),
                    Op::MarkAllRead => NotificationAction::MarkAllRead,
                    Op::Remove(id) => NotificationAction::Remove(id.to_string()),
                    Op::Clear => NotificationAction::Clear,
                    Op::Prune(secs) => NotificationAction::PruneOlderThan(t0() + Duration::seconds(secs)),
                };
                store = store.reduce(action);
                prop_assert_eq!(store.unread_count(), store.unread().count());
                prop_assert!(store.len() <= MAX_NOTIFICATIONS);
            }
        }
    }

    #[test]
    fn new_message_preview_is_truncated() {
        let event = ServerEvent::NewMessage(IncomingMessage {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "u2".into(),
            sender_name: "Kofi".into(),
            content: "x".repeat(150),
            timestamp: t0(),
            attachments: vec![],
        });
        let n = notification_for(&event, t0()).unwrap();
        assert_eq!(n.id, "m1");
        assert_eq!(n.kind, NotificationKind::Message);
        assert_eq!(n.title, "New message from Kofi");
        assert_eq!(n.message.len(), 103);
        assert!(n.message.ends_with("..."));
        assert_eq!(n.metadata["conversationId"], "c1");
    }

    #[test]
    fn job_status_title_and_severity() {
        let event = ServerEvent::JobStatusUpdate(JobStatusNotice {
            job_id: Some("j1".into()),
            status: "cancelled".into(),
            message: "Client cancelled".into(),
        });
        let n = notification_for(&event, t0()).unwrap();
        assert_eq!(n.title, "Job Cancelled");
        assert_eq!(n.severity, Severity::Warning);
        assert_eq!(n.kind, NotificationKind::JobStatus);
    }

    #[test]
    fn failed_payment_is_persistent() {
        let payment = |kind: &str| {
            ServerEvent::PaymentNotification(PaymentNotice {
                notice_type: kind.into(),
                message: "GHS 120".into(),
                transaction_id: Some("t1".into()),
                amount: Some(120.0),
                payment_method: None,
            })
        };
        let failed = notification_for(&payment("payment-failed"), t0()).unwrap();
        assert_eq!(failed.title, "Payment Failed");
        assert_eq!(failed.severity, Severity::Error);
        assert!(!failed.auto_hide);
        assert_eq!(failed.metadata["amount"], json!(120.0));

        let received = notification_for(&payment("payment-received"), t0()).unwrap();
        assert_eq!(received.severity, Severity::Success);
        assert!(received.auto_hide);

        let other = notification_for(&payment("refund"), t0()).unwrap();
        assert_eq!(other.title, "Payment Update");
    }

    #[test]
    fn system_and_maintenance_notices() {
        let system = ServerEvent::SystemNotification(SystemNotice {
            title: "Heads up".into(),
            message: "Fees change on Monday".into(),
            severity: None,
            auto_hide: Some(false),
            metadata: None,
        });
        let n = notification_for(&system, t0()).unwrap();
        assert_eq!(n.severity, Severity::Info);
        assert!(!n.auto_hide);

        let maintenance = ServerEvent::MaintenanceNotice(MaintenanceNotice {
            message: "Down at 02:00".into(),
            actions: vec![json!({"label": "Details"})],
        });
        let n = notification_for(&maintenance, t0()).unwrap();
        assert_eq!(n.title, "Maintenance Notice");
        assert!(!n.auto_hide);
        assert_eq!(n.actions.len(), 1);
    }

    #[test]
    fn status_and_bid_events_produce_nothing() {
        let status = ServerEvent::PaymentStatusUpdate(PaymentStatusNotice {
            transaction_id: None,
            status: "pending".into(),
            message: None,
        });
        assert!(notification_for(&status, t0()).is_none());
        assert!(notification_for(&ServerEvent::BidAccepted(json!({})), t0()).is_none());
    }
}
