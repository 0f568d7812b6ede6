//! Deadline bookkeeping for the connection manager.
//!
//! Timers are plain records keyed by a [`TimerId`]; nothing here sleeps.
//! The session loop asks for [`TimerArena::next_deadline`], waits until
//! then, and hands [`TimerArena::take_due`] back to the manager.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Timer<K> {
    pub id: TimerId,
    pub kind: K,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug)]
pub struct TimerArena<K> {
    next_id: u64,
    timers: BTreeMap<TimerId, Timer<K>>,
}

impl<K> Default for TimerArena<K> {
    fn default() -> Self {
        Self {
            next_id: 0,
            timers: BTreeMap::new(),
        }
    }
}

impl<K: Clone> TimerArena<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: K, deadline: DateTime<Utc>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.insert(id, Timer { id, kind, deadline });
        id
    }

    /// Returns whether the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Remove and return every timer due at `now`, earliest deadline first.
    /// Ties fire in scheduling order.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Timer<K>> {
        let due: Vec<TimerId> = self
            .timers
            .values()
            .filter(|t| t.deadline <= now)
            .map(|t| t.id)
            .collect();
        let mut fired: Vec<Timer<K>> = due
            .into_iter()
            .filter_map(|id| self.timers.remove(&id))
            .collect();
        fired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        fired
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
