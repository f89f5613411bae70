//! Session state: the normalized, in-memory view the client renders from.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use causerie_shared::protocol::{RosterEntry, UserProfile};
use causerie_shared::types::{LinkmanId, LinkmanKind, UserId};

use crate::message_map::MessageMap;
use crate::models::Message;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInfo {
    pub creator: Option<UserId>,
    /// Currently online members, refreshed by the presence poll.
    pub online_members: HashSet<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub creator: Option<UserId>,
    pub subscribers: HashSet<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityInfo {
    /// Groups and channels the container references.
    pub groups: Vec<LinkmanId>,
}

/// Linkman variant data. Behavior differs between variants in exactly three
/// places: unread accounting (message surfaces only), member versus
/// subscriber semantics, and posting rights (channels are creator-only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkmanVariant {
    Friend,
    Temporary,
    Group(GroupInfo),
    Channel(ChannelInfo),
    Community(CommunityInfo),
}

impl LinkmanVariant {
    pub fn kind(&self) -> LinkmanKind {
        match self {
            LinkmanVariant::Friend => LinkmanKind::Friend,
            LinkmanVariant::Temporary => LinkmanKind::Temporary,
            LinkmanVariant::Group(_) => LinkmanKind::Group,
            LinkmanVariant::Channel(_) => LinkmanKind::Channel,
            LinkmanVariant::Community(_) => LinkmanKind::Community,
        }
    }

    /// Whether messages can be held under this linkman at all.
    pub fn is_message_surface(&self) -> bool {
        match self {
            LinkmanVariant::Friend
            | LinkmanVariant::Temporary
            | LinkmanVariant::Group(_)
            | LinkmanVariant::Channel(_) => true,
            LinkmanVariant::Community(_) => false,
        }
    }

    /// Whether `user` may post here. Channels are single-publisher.
    pub fn can_post(&self, user: &UserId) -> bool {
        match self {
            LinkmanVariant::Friend | LinkmanVariant::Temporary | LinkmanVariant::Group(_) => true,
            LinkmanVariant::Channel(info) => info.creator.as_ref() == Some(user),
            LinkmanVariant::Community(_) => false,
        }
    }
}

/// One conversation endpoint and everything the client holds for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Linkman {
    pub id: LinkmanId,
    pub name: String,
    pub avatar: String,
    pub create_time: DateTime<Utc>,
    pub variant: LinkmanVariant,
    /// Messages received while this linkman was not focused. Zero whenever it
    /// is the focused one.
    pub unread: u32,
    pub messages: MessageMap,
    /// Who is typing right now. Absent (not an empty map) when nobody is, so
    /// renderers can check cheaply.
    pub typing_users: Option<HashMap<UserId, String>>,
}

impl Linkman {
    pub fn kind(&self) -> LinkmanKind {
        self.variant.kind()
    }

    /// Build a linkman from a roster entry, with no messages yet.
    pub fn from_roster(entry: RosterEntry) -> Self {
        let variant = match entry.kind {
            LinkmanKind::Friend => LinkmanVariant::Friend,
            LinkmanKind::Temporary => LinkmanVariant::Temporary,
            LinkmanKind::Group => LinkmanVariant::Group(GroupInfo {
                creator: entry.creator,
                online_members: HashSet::new(),
            }),
            LinkmanKind::Channel => LinkmanVariant::Channel(ChannelInfo {
                creator: entry.creator,
                subscribers: HashSet::new(),
            }),
            LinkmanKind::Community => LinkmanVariant::Community(CommunityInfo {
                groups: entry.members,
            }),
        };

        Self {
            id: entry.id,
            name: entry.name,
            avatar: entry.avatar,
            create_time: entry.create_time,
            variant,
            unread: 0,
            messages: MessageMap::new(),
            typing_users: None,
        }
    }

    /// Ephemeral DM endpoint opened by an inbound message from a stranger.
    pub fn temporary(id: LinkmanId, name: String, avatar: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            avatar,
            create_time: now,
            variant: LinkmanVariant::Temporary,
            unread: 0,
            messages: MessageMap::new(),
            typing_users: None,
        }
    }
}

/// Atomic bootstrap payload: the roster plus per-linkman seed history,
/// applied to the store in one transition.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    pub user: Option<UserProfile>,
    pub linkmans: Vec<SnapshotLinkman>,
    /// True when token resume failed and the session degraded to guest mode.
    pub guest_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotLinkman {
    pub linkman: Linkman,
    pub messages: Vec<Message>,
    pub unread: u32,
}

/// Process-wide session: one per connected client.
///
/// Created on bootstrap, reset on logout, retained across reconnects (only
/// `connected` flips). Mutated exclusively through the transition functions
/// in [`crate::transitions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// Current user identity; absent for guests.
    pub user: Option<UserProfile>,
    pub connected: bool,
    /// The linkman the user is looking at, if any.
    pub focus: Option<LinkmanId>,
    pub linkmans: HashMap<LinkmanId, Linkman>,
}

impl SessionState {
    /// Anonymous, guest-capable default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linkman(&self, id: &LinkmanId) -> Option<&Linkman> {
        self.linkmans.get(id)
    }

    pub fn focused(&self) -> Option<&Linkman> {
        self.focus.as_ref().and_then(|id| self.linkmans.get(id))
    }

    pub fn is_focused(&self, id: &LinkmanId) -> bool {
        self.focus.as_ref() == Some(id)
    }

    /// The session user's id, if authenticated.
    pub fn self_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }
}
