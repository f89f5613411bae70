//! Ephemeral presence state.
//!
//! Typing indicators, delivery/read receipts and the cached group
//! online-member lists all live here. None of it is durable; everything is
//! rebuilt from scratch on the next session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use causerie_shared::protocol::{OnlineMembersResponse, SenderInfo};
use causerie_shared::types::{LinkmanId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

/// Typing transition the emitting client should send to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Emitting-side debouncer turning raw input into start/stop signals.
///
/// Start fires on the first qualifying keystroke after idle; stop fires on
/// send or after the inactivity window. The receiving side has no expiry of
/// its own and trusts the explicit stop, so this debouncer is the only thing
/// standing between a crashed client and a stale "is typing" on every peer.
#[derive(Debug)]
pub struct TypingDebouncer {
    window: Duration,
    active: HashMap<LinkmanId, Instant>,
}

impl TypingDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            active: HashMap::new(),
        }
    }

    /// A qualifying keystroke happened. Returns `Start` on the idle→active
    /// edge, nothing while already active.
    pub fn on_input(&mut self, linkman: &LinkmanId, now: Instant) -> Option<TypingSignal> {
        match self.active.insert(linkman.clone(), now) {
            None => Some(TypingSignal::Start),
            Some(_) => None,
        }
    }

    /// The user sent their message. Returns `Stop` if a start was emitted.
    pub fn on_send(&mut self, linkman: &LinkmanId) -> Option<TypingSignal> {
        self.active.remove(linkman).map(|_| TypingSignal::Stop)
    }

    /// Collect linkmans whose inactivity window has elapsed; each owes the
    /// hub a stop signal.
    pub fn expire(&mut self, now: Instant) -> Vec<LinkmanId> {
        let window = self.window;
        let expired: Vec<LinkmanId> = self
            .active
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= window)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.active.remove(id);
        }
        expired
    }

    pub fn reset(&mut self) {
        self.active.clear();
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Delivery state of a message for one user. Ordered: read supersedes
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiptCounts {
    /// Users who have at least received the message (read implies delivered).
    pub delivered: usize,
    pub read: usize,
}

/// In-memory, advisory receipt index.
///
/// Receipts are monotonic per (message, user): a later `delivered` never
/// downgrades an earlier `read`, regardless of arrival order.
#[derive(Debug, Default)]
pub struct ReceiptIndex {
    by_message: HashMap<MessageId, HashMap<UserId, ReceiptStatus>>,
}

impl ReceiptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one receipt. Returns whether anything changed.
    pub fn apply(&mut self, message: &MessageId, user: &UserId, status: ReceiptStatus) -> bool {
        let per_user = self.by_message.entry(message.clone()).or_default();
        match per_user.get(user) {
            Some(held) if *held >= status => {
                debug!(message = %message, user = %user, "Receipt does not advance status, ignoring");
                false
            }
            _ => {
                per_user.insert(user.clone(), status);
                true
            }
        }
    }

    pub fn status(&self, message: &MessageId, user: &UserId) -> Option<ReceiptStatus> {
        self.by_message.get(message)?.get(user).copied()
    }

    pub fn counts(&self, message: &MessageId) -> ReceiptCounts {
        let Some(per_user) = self.by_message.get(message) else {
            return ReceiptCounts::default();
        };
        ReceiptCounts {
            delivered: per_user.len(),
            read: per_user
                .values()
                .filter(|status| **status == ReceiptStatus::Read)
                .count(),
        }
    }

    pub fn clear(&mut self) {
        self.by_message.clear();
    }
}

// ---------------------------------------------------------------------------
// Online members
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedMembers {
    token: String,
    members: Vec<SenderInfo>,
}

/// Client cache of group online-member lists, keyed by the hub's cache token.
///
/// A poll carries the last-known token; when it matches the hub's current one
/// the hub answers without the member list and the cached copy is reused.
/// This is a deliberate staleness window traded for payload size on the 60 s
/// poll — do not strengthen it.
#[derive(Debug, Default)]
pub struct OnlineMemberCache {
    entries: HashMap<LinkmanId, CachedMembers>,
}

impl OnlineMemberCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to send with the next poll for this group.
    pub fn token(&self, group: &LinkmanId) -> Option<String> {
        self.entries.get(group).map(|entry| entry.token.clone())
    }

    /// Fold a poll response into the cache and return the current list.
    pub fn apply_response(
        &mut self,
        group: &LinkmanId,
        response: OnlineMembersResponse,
    ) -> Vec<SenderInfo> {
        match response.members {
            Some(members) => {
                self.entries.insert(
                    group.clone(),
                    CachedMembers {
                        token: response.cache,
                        members: members.clone(),
                    },
                );
                members
            }
            None => match self.entries.get(group) {
                Some(cached) => cached.members.clone(),
                None => {
                    // The hub short-circuited against a token we no longer
                    // hold; treat as empty until the next full response.
                    warn!(group = %group, "Cache-hit response without a cached list");
                    Vec::new()
                }
            },
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linkman(id: &str) -> LinkmanId {
        LinkmanId::from(id)
    }

    #[test]
    fn test_typing_start_fires_once_per_burst() {
        let mut debouncer = TypingDebouncer::new(Duration::from_secs(3));
        let now = Instant::now();
        let l = linkman("f1");

        assert_eq!(debouncer.on_input(&l, now), Some(TypingSignal::Start));
        assert_eq!(debouncer.on_input(&l, now + Duration::from_millis(500)), None);
        assert_eq!(debouncer.on_send(&l), Some(TypingSignal::Stop));
        // Next keystroke after send is a fresh burst.
        assert_eq!(
            debouncer.on_input(&l, now + Duration::from_secs(1)),
            Some(TypingSignal::Start)
        );
    }

    #[test]
    fn test_typing_expires_after_inactivity_window() {
        let mut debouncer = TypingDebouncer::new(Duration::from_secs(3));
        let now = Instant::now();
        let l = linkman("f1");

        debouncer.on_input(&l, now);
        assert!(debouncer.expire(now + Duration::from_secs(2)).is_empty());
        assert_eq!(debouncer.expire(now + Duration::from_secs(3)), vec![l.clone()]);
        // Expired entries owe no second stop.
        assert!(debouncer.expire(now + Duration::from_secs(10)).is_empty());
        assert_eq!(debouncer.on_send(&l), None);
    }

    #[test]
    fn test_read_beats_delivered_regardless_of_order() {
        let mut receipts = ReceiptIndex::new();
        let message = MessageId::from("m1");
        let user = UserId::from("u2");

        assert!(receipts.apply(&message, &user, ReceiptStatus::Read));
        // Out-of-order delivered arrives afterwards.
        assert!(!receipts.apply(&message, &user, ReceiptStatus::Delivered));
        assert_eq!(receipts.status(&message, &user), Some(ReceiptStatus::Read));
    }

    #[test]
    fn test_delivered_upgrades_to_read() {
        let mut receipts = ReceiptIndex::new();
        let message = MessageId::from("m1");
        let user = UserId::from("u2");

        assert!(receipts.apply(&message, &user, ReceiptStatus::Delivered));
        assert!(receipts.apply(&message, &user, ReceiptStatus::Read));
        assert_eq!(receipts.status(&message, &user), Some(ReceiptStatus::Read));
    }

    #[test]
    fn test_receipt_counts_accumulate() {
        let mut receipts = ReceiptIndex::new();
        let message = MessageId::from("m1");

        receipts.apply(&message, &UserId::from("u2"), ReceiptStatus::Delivered);
        receipts.apply(&message, &UserId::from("u3"), ReceiptStatus::Read);
        receipts.apply(&message, &UserId::from("u4"), ReceiptStatus::Read);

        let counts = receipts.counts(&message);
        assert_eq!(counts.delivered, 3);
        assert_eq!(counts.read, 2);
    }

    fn member(id: &str) -> SenderInfo {
        SenderInfo {
            id: UserId::from(id),
            username: format!("user-{id}"),
            avatar: String::new(),
            tag: String::new(),
        }
    }

    #[test]
    fn test_online_cache_token_round_trip() {
        let mut cache = OnlineMemberCache::new();
        let group = linkman("g1");
        assert_eq!(cache.token(&group), None);

        let full = OnlineMembersResponse {
            cache: "tok-1".to_string(),
            members: Some(vec![member("u2"), member("u3")]),
        };
        let members = cache.apply_response(&group, full);
        assert_eq!(members.len(), 2);
        assert_eq!(cache.token(&group), Some("tok-1".to_string()));

        // Token matched: the hub omits the list, the cache serves it.
        let hit = OnlineMembersResponse {
            cache: "tok-1".to_string(),
            members: None,
        };
        let members = cache.apply_response(&group, hit);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_online_cache_miss_without_cached_list() {
        let mut cache = OnlineMemberCache::new();
        let group = linkman("g1");
        let hit = OnlineMembersResponse {
            cache: "tok-9".to_string(),
            members: None,
        };
        assert!(cache.apply_response(&group, hit).is_empty());
    }
}
