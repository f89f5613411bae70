//! Ordered message map.
//!
//! Messages are keyed by identifier and ordered by creation time, ties broken
//! by insertion order. Inserting an identifier that is already present never
//! changes state, which is what makes at-least-once delivery and overlapping
//! history backfills converge.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use causerie_shared::types::MessageId;

use crate::models::Message;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMap {
    /// Message ids sorted by (create_time, insertion order).
    order: Vec<MessageId>,
    by_id: HashMap<MessageId, Message>,
}

impl MessageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.by_id.get_mut(id)
    }

    /// Insert a message at its ordered position.
    ///
    /// Returns false (and leaves the held entry untouched) when the
    /// identifier is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.by_id.contains_key(&message.id) {
            return false;
        }

        // Walk back over entries created strictly later, so equal creation
        // times keep insertion order.
        let mut pos = self.order.len();
        while pos > 0 {
            let prev = &self.by_id[&self.order[pos - 1]];
            if prev.create_time <= message.create_time {
                break;
            }
            pos -= 1;
        }

        self.order.insert(pos, message.id.clone());
        self.by_id.insert(message.id.clone(), message);
        true
    }

    /// Union-merge older history into the map. Held entries win on key
    /// collision; returns how many entries were actually new.
    pub fn merge_history(&mut self, messages: Vec<Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.insert(message) {
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let message = self.by_id.remove(id)?;
        self.order.retain(|held| held != id);
        Some(message)
    }

    /// Replace the entry under `old_id` with `message` under its own
    /// identifier. The placeholder entry and the new entry are never both
    /// present. If the new identifier is already held (the pushed copy beat
    /// the acknowledgement), the placeholder is simply dropped.
    pub fn rekey(&mut self, old_id: &MessageId, message: Message) -> bool {
        if self.remove(old_id).is_none() {
            return false;
        }
        self.insert(message);
        true
    }

    /// Drop the oldest entries until at most `limit` remain.
    pub fn trim_to_newest(&mut self, limit: usize) -> usize {
        let mut dropped = 0;
        while self.order.len() > limit {
            let oldest = self.order.remove(0);
            self.by_id.remove(&oldest);
            dropped += 1;
        }
        dropped
    }

    /// Messages in display order (oldest first).
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().map(|id| &self.by_id[id])
    }

    /// The newest held message, if any.
    pub fn newest(&self) -> Option<&Message> {
        self.order.last().map(|id| &self.by_id[id])
    }

    /// Mutable access to every held message, in no particular order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.by_id.values_mut()
    }
}
