//! Presence store for user online status.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use kelmah_shared::{PresenceRecord, PresenceStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceAction {
    SetOnline {
        user_id: String,
        now: DateTime<Utc>,
    },
    SetOffline {
        user_id: String,
        now: DateTime<Utc>,
    },
    /// Replace the online set wholesale (sent by the backend after a reconnect).
    BulkSync {
        user_ids: Vec<String>,
        now: DateTime<Utc>,
    },
    UpdateStatus {
        user_id: String,
        status: PresenceStatus,
        custom_status: Option<String>,
        last_seen: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceStore {
    online: BTreeSet<String>,
    records: HashMap<String, PresenceRecord>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reduce(mut self, action: PresenceAction) -> Self {
        self.apply(action);
        self
    }

    pub fn apply(&mut self, action: PresenceAction) {
        match action {
            PresenceAction::SetOnline { user_id, now } => self.set_online(&user_id, now),
            PresenceAction::SetOffline { user_id, now } => self.set_offline(&user_id, now),
            PresenceAction::BulkSync { user_ids, now } => self.bulk_sync(user_ids, now),
            PresenceAction::UpdateStatus {
                user_id,
                status,
                custom_status,
                last_seen,
            } => self.update_status(&user_id, status, custom_status, last_seen),
        }
    }

    pub fn set_online(&mut self, user_id: &str, now: DateTime<Utc>) {
        self.update_status(user_id, PresenceStatus::Online, None, now);
    }

    pub fn set_offline(&mut self, user_id: &str, now: DateTime<Utc>) {
        self.update_status(user_id, PresenceStatus::Offline, None, now);
    }

    /// Everyone in `user_ids` is online; anyone previously online who is
    /// missing from it goes offline.
    pub fn bulk_sync(&mut self, user_ids: Vec<String>, now: DateTime<Utc>) {
        let incoming: BTreeSet<String> = user_ids.into_iter().collect();
        let departed: Vec<String> = self.online.difference(&incoming).cloned().collect();
        for user_id in &departed {
            self.set_offline(user_id, now);
        }
        for user_id in &incoming {
            self.set_online(user_id, now);
        }
        self.online = incoming;
    }

    /// Away and busy users count as online.
    pub fn update_status(
        &mut self,
        user_id: &str,
        status: PresenceStatus,
        custom_status: Option<String>,
        last_seen: DateTime<Utc>,
    ) {
        match status {
            PresenceStatus::Online | PresenceStatus::Away | PresenceStatus::Busy => {
                self.online.insert(user_id.to_string());
            }
            PresenceStatus::Offline => {
                self.online.remove(user_id);
            }
        }
        self.records.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                status,
                custom_status,
                last_seen,
            },
        );
    }

    // --- Selectors ---

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    /// Unknown users are reported offline.
    pub fn status_of(&self, user_id: &str) -> PresenceStatus {
        self.records
            .get(user_id)
            .map(|r| r.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn record(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.records.get(user_id)
    }

    /// Sorted by user id.
    pub fn online_users(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn online_then_offline_updates_last_seen() {
        let later = t0() + Duration::minutes(3);
        let store = PresenceStore::new()
            .reduce(PresenceAction::SetOnline {
                user_id: "u1".into(),
                now: t0(),
            })
            .reduce(PresenceAction::SetOffline {
                user_id: "u1".into(),
                now: later,
            });
        assert!(!store.is_online("u1"));
        let record = store.record("u1").unwrap();
        assert_eq!(record.status, PresenceStatus::Offline);
        assert_eq!(record.last_seen, later);
    }

    #[test]
    fn bulk_sync_replaces_the_online_set() {
        let mut store = PresenceStore::new();
        store.set_online("u1", t0());
        store.set_online("u2", t0());
        store.bulk_sync(vec!["u2".into(), "u3".into()], t0() + Duration::seconds(1));

        let online: Vec<_> = store.online_users().collect();
        assert_eq!(online, vec!["u2", "u3"]);
        assert_eq!(store.status_of("u1"), PresenceStatus::Offline);
        assert_eq!(store.status_of("u3"), PresenceStatus::Online);
    }

    #[test]
    fn away_keeps_user_online_with_custom_status() {
        let mut store = PresenceStore::new();
        store.set_online("u1", t0());
        store.update_status("u1", PresenceStatus::Away, Some("On site".into()), t0());
        assert!(store.is_online("u1"));
        assert_eq!(store.status_of("u1"), PresenceStatus::Away);
        assert_eq!(
            store.record("u1").unwrap().custom_status.as_deref(),
            Some("On site")
        );
        assert_eq!(store.status_of("stranger"), PresenceStatus::Offline);
    }

    #[test]
    fn busy_or_away_without_prior_online_counts_as_online() {
        let store = PresenceStore::new()
            .reduce(PresenceAction::UpdateStatus {
                user_id: "u1".into(),
                status: PresenceStatus::Busy,
                custom_status: None,
                last_seen: t0(),
            })
            .reduce(PresenceAction::UpdateStatus {
                user_id: "u2".into(),
                status: PresenceStatus::Away,
                custom_status: None,
                last_seen: t0(),
            });
        assert!(store.is_online("u1"));
        assert!(store.is_online("u2"));
        assert_eq!(store.online_users().collect::<Vec<_>>(), vec!["u1", "u2"]);

        let store = store.reduce(PresenceAction::SetOffline {
            user_id: "u2".into(),
            now: t0(),
        });
        assert!(!store.is_online("u2"));
    }
}
