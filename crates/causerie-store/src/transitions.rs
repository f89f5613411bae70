//! Reducer-style transitions over [`SessionState`].
//!
//! These are the only way the session state is mutated. Each transition is a
//! total function over well-formed input: an event referencing state the
//! client has already discarded is logged and becomes a no-op, never a panic,
//! so the store stays renderable. None of them perform I/O; notifications and
//! sound run after commit, as an explicit post-commit step list owned by the
//! caller.

use tracing::{debug, warn};

use causerie_shared::constants::FOCUS_TRIM_LIMIT;
use causerie_shared::types::{LinkmanId, MessageId, UserId};

use crate::models::{Message, MessagePatch};
use crate::state::{Linkman, RosterSnapshot, SessionState};

impl SessionState {
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Focus a linkman: clear its unread counter and trim its message map to
    /// the newest [`FOCUS_TRIM_LIMIT`] entries. The trim is a display-cache
    /// bound, not a deletion of server truth.
    pub fn set_focus(&mut self, id: &LinkmanId) {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, "set_focus on unknown linkman, ignoring");
            return;
        };

        linkman.unread = 0;
        let dropped = linkman.messages.trim_to_newest(FOCUS_TRIM_LIMIT);
        if dropped > 0 {
            debug!(linkman = %id, dropped, "Trimmed message cache on focus");
        }
        self.focus = Some(id.clone());
    }

    /// Register a linkman. Exactly one linkman per identifier: a second
    /// insert under a held id is ignored.
    pub fn insert_linkman(&mut self, linkman: Linkman) -> bool {
        if self.linkmans.contains_key(&linkman.id) {
            debug!(linkman = %linkman.id, "Linkman already present, keeping held entry");
            return false;
        }
        self.linkmans.insert(linkman.id.clone(), linkman);
        true
    }

    pub fn remove_linkman(&mut self, id: &LinkmanId) {
        if self.linkmans.remove(id).is_none() {
            warn!(linkman = %id, "remove_linkman on unknown linkman, ignoring");
            return;
        }
        if self.focus.as_ref() == Some(id) {
            self.focus = None;
        }
    }

    pub fn rename_linkman(&mut self, id: &LinkmanId, name: &str) {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, "rename_linkman on unknown linkman, ignoring");
            return;
        };
        linkman.name = name.to_string();
    }

    /// Append a newly arrived or optimistic message.
    ///
    /// Increments unread unless the linkman is focused or the message is the
    /// session user's own. Duplicate identifiers (at-least-once delivery)
    /// change nothing, including the unread counter.
    pub fn add_linkman_message(&mut self, id: &LinkmanId, message: Message) -> bool {
        let focused = self.is_focused(id);
        let self_authored = self.self_id() == Some(&message.sender.id);
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, message = %message.id, "Message for unknown linkman, ignoring");
            return false;
        };
        if !linkman.variant.is_message_surface() {
            warn!(linkman = %id, kind = %linkman.kind(), "Message for non-surface linkman, ignoring");
            return false;
        }
        if !linkman.messages.insert(message) {
            debug!(linkman = %id, "Duplicate message, ignoring");
            return false;
        }
        if !focused && !self_authored {
            linkman.unread += 1;
        }
        true
    }

    /// Union-merge fetched history. Held entries are never overwritten by
    /// arriving history.
    pub fn add_history_messages(&mut self, id: &LinkmanId, messages: Vec<Message>) -> usize {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, "History for unknown linkman, ignoring");
            return 0;
        };
        let added = linkman.messages.merge_history(messages);
        debug!(linkman = %id, added, "Merged history");
        added
    }

    /// Remove a message (hard) or replace it with a tombstone (soft).
    pub fn delete_message(&mut self, id: &LinkmanId, message_id: &MessageId, hard: bool) -> bool {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, message = %message_id, "delete_message on unknown linkman");
            return false;
        };

        if hard {
            if linkman.messages.remove(message_id).is_none() {
                warn!(linkman = %id, message = %message_id, "delete_message on unknown message");
                return false;
            }
            return true;
        }

        let Some(message) = linkman.messages.get_mut(message_id) else {
            warn!(linkman = %id, message = %message_id, "delete_message on unknown message");
            return false;
        };
        message.deleted = true;
        true
    }

    /// Patch a held message. A patch carrying a different identifier is a
    /// rekey: the placeholder entry is removed and the message inserted under
    /// the new key, never both present.
    pub fn update_message(
        &mut self,
        id: &LinkmanId,
        target: &MessageId,
        patch: MessagePatch,
    ) -> bool {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, message = %target, "update_message on unknown linkman");
            return false;
        };

        match patch.id {
            Some(ref new_id) if new_id != target => {
                let Some(mut message) = linkman.messages.remove(target) else {
                    warn!(linkman = %id, message = %target, "update_message on unknown message");
                    return false;
                };
                patch.apply_to(&mut message);
                if !linkman.messages.insert(message) {
                    // The pushed copy arrived before the acknowledgement;
                    // dropping the placeholder is all that was left to do.
                    debug!(linkman = %id, message = %new_id, "Rekey target already held");
                }
                true
            }
            _ => {
                let Some(message) = linkman.messages.get_mut(target) else {
                    warn!(linkman = %id, message = %target, "update_message on unknown message");
                    return false;
                };
                patch.apply_to(message);
                true
            }
        }
    }

    /// Add or remove a typing entry. An empty resulting set is represented as
    /// absent so renderers can check "is anyone typing" without iterating.
    pub fn set_typing_status(
        &mut self,
        id: &LinkmanId,
        user_id: &UserId,
        username: &str,
        is_typing: bool,
    ) {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, user = %user_id, "Typing signal for unknown linkman, ignoring");
            return;
        };

        if is_typing {
            linkman
                .typing_users
                .get_or_insert_with(Default::default)
                .insert(user_id.clone(), username.to_string());
        } else if let Some(users) = linkman.typing_users.as_mut() {
            users.remove(user_id);
            if users.is_empty() {
                linkman.typing_users = None;
            }
        }
    }

    /// Refresh a group's online-member set (or a channel's subscriber set)
    /// from a presence poll.
    pub fn set_online_members(
        &mut self,
        id: &LinkmanId,
        members: std::collections::HashSet<UserId>,
    ) {
        let Some(linkman) = self.linkmans.get_mut(id) else {
            warn!(linkman = %id, "Online members for unknown linkman, ignoring");
            return;
        };
        match &mut linkman.variant {
            crate::state::LinkmanVariant::Group(info) => info.online_members = members,
            crate::state::LinkmanVariant::Channel(info) => info.subscribers = members,
            _ => {
                warn!(linkman = %id, kind = %linkman.kind(), "Online members for non-group linkman, ignoring");
            }
        }
    }

    /// Re-stamp the tag on the sender snapshot of every held message from
    /// `user_id`, across all linkmans.
    pub fn restamp_sender_tag(&mut self, user_id: &UserId, tag: &str) {
        for linkman in self.linkmans.values_mut() {
            for message in linkman.messages.values_mut() {
                if &message.sender.id == user_id {
                    message.sender.tag = tag.to_string();
                }
            }
        }
        if let Some(user) = self.user.as_mut() {
            if &user.id == user_id {
                user.tag = tag.to_string();
            }
        }
    }

    /// Apply a bootstrap snapshot in one atomic transition.
    ///
    /// Linkmans present locally but missing from the snapshot are dropped
    /// (the hub roster is truth on resync). Retained linkmans keep their held
    /// messages and union-merge the snapshot's seed history into them; the
    /// unread counter takes the hub-reported value, except for the focused
    /// linkman which stays at zero.
    pub fn apply_snapshot(&mut self, snapshot: RosterSnapshot) {
        let mut previous = std::mem::take(&mut self.linkmans);

        for snap in snapshot.linkmans {
            let mut linkman = match previous.remove(&snap.linkman.id) {
                Some(mut held) => {
                    held.name = snap.linkman.name;
                    held.avatar = snap.linkman.avatar;
                    held.create_time = snap.linkman.create_time;
                    held
                }
                None => snap.linkman,
            };
            linkman.messages.merge_history(snap.messages);
            linkman.unread = snap.unread;
            self.linkmans.insert(linkman.id.clone(), linkman);
        }

        if !previous.is_empty() {
            debug!(dropped = previous.len(), "Dropped linkmans missing from hub roster");
        }

        self.user = snapshot.user;
        self.connected = true;

        match self.focus.take() {
            Some(focus) if self.linkmans.contains_key(&focus) => {
                if let Some(linkman) = self.linkmans.get_mut(&focus) {
                    linkman.unread = 0;
                }
                self.focus = Some(focus);
            }
            _ => {}
        }
    }

    /// Tear the session down to the anonymous, guest-capable default.
    /// Connectivity is transport state and survives.
    pub fn logout(&mut self) {
        let connected = self.connected;
        *self = SessionState {
            connected,
            ..SessionState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use causerie_shared::protocol::{MessageKind, SenderInfo, UserProfile};
    use chrono::{TimeZone, Utc};

    use crate::state::{LinkmanVariant, SnapshotLinkman};

    fn sender(id: &str) -> SenderInfo {
        SenderInfo {
            id: UserId::from(id),
            username: format!("user-{id}"),
            avatar: String::new(),
            tag: String::new(),
        }
    }

    fn msg(id: &str, from: &str, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            kind: MessageKind::Text,
            content: format!("content-{id}"),
            sender: sender(from),
            create_time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            loading: false,
            deleted: false,
            failed: false,
        }
    }

    fn friend(id: &str) -> Linkman {
        Linkman {
            id: LinkmanId::from(id),
            name: format!("friend-{id}"),
            avatar: String::new(),
            create_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            variant: LinkmanVariant::Friend,
            unread: 0,
            messages: crate::message_map::MessageMap::new(),
            typing_users: None,
        }
    }

    fn state_with(linkmans: Vec<Linkman>) -> SessionState {
        let mut state = SessionState::new();
        for lm in linkmans {
            state.insert_linkman(lm);
        }
        state
    }

    #[test]
    fn test_unread_counts_only_when_not_focused() {
        let mut state = state_with(vec![friend("f1"), friend("f2")]);
        state.set_focus(&LinkmanId::from("f1"));

        state.add_linkman_message(&LinkmanId::from("f1"), msg("a", "u2", 1));
        state.add_linkman_message(&LinkmanId::from("f2"), msg("b", "u2", 2));
        state.add_linkman_message(&LinkmanId::from("f2"), msg("c", "u2", 3));

        assert_eq!(state.linkman(&LinkmanId::from("f1")).unwrap().unread, 0);
        assert_eq!(state.linkman(&LinkmanId::from("f2")).unwrap().unread, 2);

        state.set_focus(&LinkmanId::from("f2"));
        assert_eq!(state.linkman(&LinkmanId::from("f2")).unwrap().unread, 0);
    }

    #[test]
    fn test_duplicate_message_does_not_bump_unread() {
        let mut state = state_with(vec![friend("f1")]);
        assert!(state.add_linkman_message(&LinkmanId::from("f1"), msg("a", "u2", 1)));
        assert!(!state.add_linkman_message(&LinkmanId::from("f1"), msg("a", "u2", 1)));
        assert_eq!(state.linkman(&LinkmanId::from("f1")).unwrap().unread, 1);
    }

    #[test]
    fn test_own_message_does_not_bump_unread() {
        let mut state = state_with(vec![friend("f1")]);
        state.user = Some(UserProfile {
            id: UserId::from("u1"),
            username: "alice".to_string(),
            avatar: String::new(),
            tag: String::new(),
        });

        assert!(state.add_linkman_message(&LinkmanId::from("f1"), msg("a", "u1", 1)));
        assert_eq!(state.linkman(&LinkmanId::from("f1")).unwrap().unread, 0);
    }

    #[test]
    fn test_set_online_members_per_variant() {
        let mut group = friend("g1");
        group.variant = LinkmanVariant::Group(Default::default());
        let mut state = state_with(vec![group, friend("f1")]);

        let members: std::collections::HashSet<UserId> =
            [UserId::from("u2"), UserId::from("u3")].into_iter().collect();
        state.set_online_members(&LinkmanId::from("g1"), members.clone());

        match &state.linkman(&LinkmanId::from("g1")).unwrap().variant {
            LinkmanVariant::Group(info) => assert_eq!(info.online_members, members),
            other => panic!("unexpected variant {other:?}"),
        }

        // A friend has no member set; the call is a logged no-op.
        state.set_online_members(&LinkmanId::from("f1"), members);
    }

    #[test]
    fn test_message_for_unknown_linkman_is_noop() {
        let mut state = state_with(vec![]);
        assert!(!state.add_linkman_message(&LinkmanId::from("nope"), msg("a", "u2", 1)));
        assert!(state.linkmans.is_empty());
    }

    #[test]
    fn test_community_is_not_a_message_surface() {
        let mut community = friend("c1");
        community.variant = LinkmanVariant::Community(Default::default());
        let mut state = state_with(vec![community]);

        assert!(!state.add_linkman_message(&LinkmanId::from("c1"), msg("a", "u2", 1)));
    }

    #[test]
    fn test_history_merge_is_idempotent() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        state.add_linkman_message(&id, msg("a", "u2", 5));

        let overlapping = vec![msg("a", "u2", 5), msg("b", "u2", 1)];
        let only_new = vec![msg("b", "u2", 1)];

        let mut twin = state.clone();
        state.add_history_messages(&id, overlapping);
        twin.add_history_messages(&id, only_new);

        assert_eq!(state, twin);
    }

    #[test]
    fn test_soft_delete_leaves_tombstone() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        state.add_linkman_message(&id, msg("a", "u2", 1));

        assert!(state.delete_message(&id, &MessageId::from("a"), false));
        let held = state
            .linkman(&id)
            .unwrap()
            .messages
            .get(&MessageId::from("a"))
            .unwrap();
        assert!(held.deleted);
    }

    #[test]
    fn test_hard_delete_removes_entry() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        state.add_linkman_message(&id, msg("a", "u2", 1));

        assert!(state.delete_message(&id, &MessageId::from("a"), true));
        assert!(state.linkman(&id).unwrap().messages.is_empty());
    }

    #[test]
    fn test_rekey_via_update_message() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        let placeholder = MessageId::placeholder(&id, 1_700_000_000_000);

        let mut optimistic = msg(placeholder.as_str(), "u1", 5);
        optimistic.loading = true;
        state.add_linkman_message(&id, optimistic);

        let patch = MessagePatch {
            id: Some(MessageId::from("srv-9")),
            loading: Some(false),
            ..Default::default()
        };
        assert!(state.update_message(&id, &placeholder, patch));

        let messages = &state.linkman(&id).unwrap().messages;
        assert!(!messages.contains(&placeholder));
        let held = messages.get(&MessageId::from("srv-9")).unwrap();
        assert!(!held.loading);
    }

    #[test]
    fn test_update_message_partial_merge() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        let mut held = msg("a", "u1", 5);
        held.loading = true;
        state.add_linkman_message(&id, held);

        let patch = MessagePatch {
            loading: Some(false),
            ..Default::default()
        };
        assert!(state.update_message(&id, &MessageId::from("a"), patch));
        assert!(!state
            .linkman(&id)
            .unwrap()
            .messages
            .get(&MessageId::from("a"))
            .unwrap()
            .loading);
    }

    #[test]
    fn test_typing_lifecycle_leaves_absent_set() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        let user = UserId::from("u2");

        state.set_typing_status(&id, &user, "bob", true);
        assert!(state.linkman(&id).unwrap().typing_users.is_some());

        state.set_typing_status(&id, &user, "bob", false);
        assert!(state.linkman(&id).unwrap().typing_users.is_none());
    }

    #[test]
    fn test_focus_trims_message_cache() {
        let mut state = state_with(vec![friend("f1")]);
        let id = LinkmanId::from("f1");
        for i in 0..(FOCUS_TRIM_LIMIT as i64 + 5) {
            state.add_linkman_message(&id, msg(&format!("m{i}"), "u2", i));
        }

        state.set_focus(&id);
        let linkman = state.linkman(&id).unwrap();
        assert_eq!(linkman.messages.len(), FOCUS_TRIM_LIMIT);
        assert_eq!(linkman.messages.newest().unwrap().id.as_str(), "m54");
        assert!(!linkman.messages.contains(&MessageId::from("m0")));
    }

    #[test]
    fn test_restamp_sender_tag() {
        let mut state = state_with(vec![friend("f1"), friend("f2")]);
        state.add_linkman_message(&LinkmanId::from("f1"), msg("a", "u2", 1));
        state.add_linkman_message(&LinkmanId::from("f2"), msg("b", "u2", 2));
        state.add_linkman_message(&LinkmanId::from("f2"), msg("c", "u3", 3));

        state.restamp_sender_tag(&UserId::from("u2"), "admin");

        let tag_of = |linkman: &str, message: &str| {
            state
                .linkman(&LinkmanId::from(linkman))
                .unwrap()
                .messages
                .get(&MessageId::from(message))
                .unwrap()
                .sender
                .tag
                .clone()
        };
        assert_eq!(tag_of("f1", "a"), "admin");
        assert_eq!(tag_of("f2", "b"), "admin");
        assert_eq!(tag_of("f2", "c"), "");
    }

    #[test]
    fn test_reconnect_resync_scenario() {
        // Client holds 3 messages for G, disconnects; on reconnect the hub
        // reports the same 3 plus 2 new ones and an unread of 4.
        let mut state = state_with(vec![friend("g")]);
        let id = LinkmanId::from("g");
        for i in 0..3 {
            state.add_linkman_message(&id, msg(&format!("m{i}"), "u2", i));
        }
        state.set_connected(false);

        let server_messages: Vec<Message> =
            (0..5).map(|i| msg(&format!("m{i}"), "u2", i)).collect();
        let snapshot = RosterSnapshot {
            user: Some(UserProfile {
                id: UserId::from("u1"),
                username: "alice".to_string(),
                avatar: String::new(),
                tag: String::new(),
            }),
            linkmans: vec![SnapshotLinkman {
                linkman: friend("g"),
                messages: server_messages,
                unread: 4,
            }],
            guest_fallback: false,
        };
        state.apply_snapshot(snapshot);

        let linkman = state.linkman(&id).unwrap();
        assert_eq!(linkman.messages.len(), 5);
        assert_eq!(linkman.unread, 4);
        assert!(state.connected);
    }

    #[test]
    fn test_snapshot_drops_linkmans_missing_from_roster() {
        let mut state = state_with(vec![friend("keep"), friend("drop")]);
        state.set_focus(&LinkmanId::from("drop"));

        let snapshot = RosterSnapshot {
            user: None,
            linkmans: vec![SnapshotLinkman {
                linkman: friend("keep"),
                messages: vec![],
                unread: 0,
            }],
            guest_fallback: true,
        };
        state.apply_snapshot(snapshot);

        assert!(state.linkman(&LinkmanId::from("drop")).is_none());
        assert!(state.focus.is_none());
    }

    #[test]
    fn test_snapshot_keeps_focused_unread_at_zero() {
        let mut state = state_with(vec![friend("f1")]);
        state.set_focus(&LinkmanId::from("f1"));

        let snapshot = RosterSnapshot {
            user: None,
            linkmans: vec![SnapshotLinkman {
                linkman: friend("f1"),
                messages: vec![],
                unread: 7,
            }],
            guest_fallback: false,
        };
        state.apply_snapshot(snapshot);

        assert_eq!(state.linkman(&LinkmanId::from("f1")).unwrap().unread, 0);
    }

    #[test]
    fn test_logout_resets_to_guest_default() {
        let mut state = state_with(vec![friend("f1")]);
        state.user = Some(UserProfile {
            id: UserId::from("u1"),
            username: "alice".to_string(),
            avatar: String::new(),
            tag: String::new(),
        });
        state.set_connected(true);
        state.set_focus(&LinkmanId::from("f1"));

        state.logout();

        assert!(state.user.is_none());
        assert!(state.linkmans.is_empty());
        assert!(state.focus.is_none());
        assert!(state.connected);
    }

    #[test]
    fn test_channel_posting_is_creator_only() {
        let creator = UserId::from("owner");
        let variant = LinkmanVariant::Channel(crate::state::ChannelInfo {
            creator: Some(creator.clone()),
            subscribers: Default::default(),
        });
        assert!(variant.can_post(&creator));
        assert!(!variant.can_post(&UserId::from("sub")));
    }
}
