//! Commands held back while the connection is down.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use kelmah_shared::ClientCommand;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedIntent {
    pub command: ClientCommand,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO of outbound intents, replayed once per successful connection.
///
/// Unbounded and in-memory only.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    intents: VecDeque<QueuedIntent>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: ClientCommand, now: DateTime<Utc>) {
        self.intents.push_back(QueuedIntent {
            command,
            enqueued_at: now,
        });
    }

    /// Put an intent back at the head, ahead of everything queued after it.
    pub fn requeue_front(&mut self, intent: QueuedIntent) {
        self.intents.push_front(intent);
    }

    /// Take every intent out in insertion order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueuedIntent> {
        self.intents.drain(..).collect()
    }

    /// Discard everything. Returns how many intents were dropped.
    pub fn clear(&mut self) -> usize {
        let discarded = self.intents.len();
        self.intents.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedIntent> {
        self.intents.iter()
    }
}
