use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_ID_PREFIX;

// Identifiers issued by the hub are opaque strings; the client never parses
// them, only compares and displays them.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a conversation endpoint (friend, group, channel, community).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LinkmanId(pub String);

impl LinkmanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkmanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LinkmanId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message identifier.
///
/// A message carries a client-assigned placeholder identifier from the moment
/// it is inserted optimistically until the hub acknowledges it, at which point
/// the entry is rekeyed under the hub-assigned identifier. Placeholder
/// identifiers carry the `local:` prefix so the two formats can never collide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    /// Build a placeholder identifier for an optimistic message.
    pub fn placeholder(linkman: &LinkmanId, unix_millis: i64) -> Self {
        Self(format!("{}{}:{}", LOCAL_ID_PREFIX, linkman.0, unix_millis))
    }

    /// Whether this identifier is a client placeholder (not yet persisted).
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Wire tag for the linkman variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkmanKind {
    Friend,
    /// Ephemeral DM opened by an inbound message from a stranger.
    Temporary,
    Group,
    /// Broadcast: many subscribers, single publisher.
    Channel,
    /// Container referencing groups/channels; not a message surface.
    Community,
}

impl std::fmt::Display for LinkmanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkmanKind::Friend => "friend",
            LinkmanKind::Temporary => "temporary",
            LinkmanKind::Group => "group",
            LinkmanKind::Channel => "channel",
            LinkmanKind::Community => "community",
        };
        write!(f, "{s}")
    }
}
