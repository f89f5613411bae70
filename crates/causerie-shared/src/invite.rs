//! Group invite links.
//!
//! A text message whose whole body is an invite link is sent as a structured
//! `inviteV2` message instead of plain text. The transformation happens on
//! the sending client before the optimistic insert, so both the local echo
//! and the persisted message carry the structured content.

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::{LinkmanId, UserId};

/// Path marker of a group invite link, e.g.
/// `https://causerie.example/invite/group/5f3a9c01d2e4b80017aa3f01`.
const INVITE_PATH_MARKER: &str = "/invite/group/";

/// Structured content of an `inviteV2` message, serialized as JSON into the
/// message's content field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InviteV2Content {
    pub group: LinkmanId,
    pub inviter: UserId,
    pub inviter_name: String,
}

impl InviteV2Content {
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).expect("invite content serialization")
    }

    pub fn from_content(content: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Recognize a group invite link.
///
/// Matches only when the trimmed text is a single http(s) URL whose path
/// contains the invite marker followed by a non-empty group id. Anything else
/// (surrounding prose, empty id, other schemes) is plain text.
pub fn parse_invite_link(text: &str) -> Option<LinkmanId> {
    let trimmed = text.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return None;
    }
    if trimmed.contains(char::is_whitespace) {
        return None;
    }

    let idx = trimmed.find(INVITE_PATH_MARKER)?;
    let group_id = &trimmed[idx + INVITE_PATH_MARKER.len()..];
    // Strip a query string or fragment if present.
    let group_id = group_id
        .split(|c| c == '?' || c == '#' || c == '/')
        .next()
        .unwrap_or("");

    if group_id.is_empty() {
        return None;
    }
    Some(LinkmanId::from(group_id))
}
