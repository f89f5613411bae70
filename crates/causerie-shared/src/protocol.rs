//! Wire protocol between client and hub.
//!
//! Every exchange is a named event with a JSON payload. Client→hub calls are
//! acknowledged (success payload or error string); hub→client pushes are not.
//! The envelope framing at the bottom of this module is what actually crosses
//! the WebSocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;
use crate::types::{LinkmanId, LinkmanKind, MessageId, UserId};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

// Client→hub calls (acked).
pub const CALL_REGISTER: &str = "register";
pub const CALL_LOGIN: &str = "login";
pub const CALL_GUEST: &str = "guest";
pub const CALL_SEND_MESSAGE: &str = "sendMessage";
pub const CALL_GET_LINKMANS_LAST_MESSAGES: &str = "getLinkmansLastMessagesV2";
pub const CALL_GET_LINKMAN_HISTORY_MESSAGES: &str = "getLinkmanHistoryMessages";
pub const CALL_GET_GROUP_ONLINE_MEMBERS: &str = "getGroupOnlineMembersV2";
pub const CALL_SEND_TYPING_INDICATOR: &str = "sendTypingIndicator";
pub const CALL_SEND_READ_RECEIPT: &str = "sendReadReceipt";
pub const CALL_SEND_DELIVERY_RECEIPT: &str = "sendDeliveryReceipt";
pub const CALL_UPDATE_HISTORY: &str = "updateHistory";

// Hub→client pushes (no ack).
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_READ_RECEIPT: &str = "readReceipt";
pub const EVENT_DELIVERY_RECEIPT: &str = "deliveryReceipt";
pub const EVENT_CHANGE_GROUP_NAME: &str = "changeGroupName";
pub const EVENT_DELETE_GROUP: &str = "deleteGroup";
pub const EVENT_DELETE_MESSAGE: &str = "deleteMessage";
pub const EVENT_CHANGE_TAG: &str = "changeTag";

// ---------------------------------------------------------------------------
// Shared payload pieces
// ---------------------------------------------------------------------------

/// Message content type. `inviteV2` carries a structured group invite
/// (see [`crate::invite`]); everything else is an opaque string whose
/// interpretation is the renderer's job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "inviteV2")]
    InviteV2,
}

/// Sender snapshot, denormalized at send time. A later profile change does
/// not rewrite old messages (except the tag, via `changeTag`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub id: UserId,
    pub username: String,
    pub avatar: String,
    #[serde(default)]
    pub tag: String,
}

/// The authenticated user's own profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub avatar: String,
    #[serde(default)]
    pub tag: String,
}

impl UserProfile {
    /// Sender snapshot for an outbound message.
    pub fn to_sender(&self) -> SenderInfo {
        SenderInfo {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            tag: self.tag.clone(),
        }
    }
}

/// A message as it appears on the wire (pushed, acked, or in history).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    /// The linkman this message belongs to.
    pub to: LinkmanId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub from: SenderInfo,
    pub create_time: DateTime<Utc>,
    /// Soft-delete tombstone flag.
    #[serde(default)]
    pub deleted: bool,
}

/// One linkman as it appears in the login/guest roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: LinkmanId,
    pub name: String,
    pub avatar: String,
    #[serde(rename = "type")]
    pub kind: LinkmanKind,
    pub create_time: DateTime<Utc>,
    /// Creator id, present for groups and channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserId>,
    /// For communities: the groups/channels the container references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<LinkmanId>,
}

// ---------------------------------------------------------------------------
// Call payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Response of `login` and `register`. `guest` returns the same shape with
/// `user` absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    pub linkmans: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to: LinkmanId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagesRequest {
    pub linkmans: Vec<LinkmanId>,
}

/// Per-linkman entry of the batched last-messages response, keyed by
/// linkman id in the enclosing map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagesEntry {
    pub messages: Vec<WireMessage>,
    pub unread: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub linkman_id: LinkmanId,
    /// Number of messages the client already holds; the hub returns messages
    /// older than this offset.
    pub exist_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMembersRequest {
    pub group_id: LinkmanId,
    /// Last-known cache token. If it matches the hub's current token the hub
    /// answers without the member list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
}

/// `members` is absent when the client's cache token matched and the cached
/// list should be reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMembersResponse {
    pub cache: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<SenderInfo>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicatorRequest {
    pub to: LinkmanId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub message_id: MessageId,
    pub linkman_id: LinkmanId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistoryRequest {
    pub linkman_id: LinkmanId,
    /// Newest message id the client has seen for this linkman.
    pub message_id: MessageId,
}

// ---------------------------------------------------------------------------
// Pushed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub linkman_id: LinkmanId,
    pub user_id: UserId,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEvent {
    pub message_id: MessageId,
    pub linkman_id: LinkmanId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupNameEvent {
    pub group_id: LinkmanId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeletedEvent {
    pub group_id: LinkmanId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedEvent {
    pub linkman_id: LinkmanId,
    pub message_id: MessageId,
    /// Physical removal versus tombstone.
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagChangedEvent {
    pub user_id: UserId,
    pub tag: String,
}

/// All events the hub pushes without expecting an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Message(WireMessage),
    Typing(TypingEvent),
    ReadReceipt(ReceiptEvent),
    DeliveryReceipt(ReceiptEvent),
    ChangeGroupName(GroupNameEvent),
    DeleteGroup(GroupDeletedEvent),
    DeleteMessage(MessageDeletedEvent),
    ChangeTag(TagChangedEvent),
}

impl ServerEvent {
    /// Parse a pushed event from its wire name and payload.
    pub fn parse(name: &str, payload: Value) -> Result<Self, WireError> {
        fn de<T: serde::de::DeserializeOwned>(
            event: &str,
            payload: Value,
        ) -> Result<T, WireError> {
            serde_json::from_value(payload).map_err(|source| WireError::MalformedPayload {
                event: event.to_string(),
                source,
            })
        }

        match name {
            EVENT_MESSAGE => Ok(Self::Message(de(name, payload)?)),
            EVENT_TYPING => Ok(Self::Typing(de(name, payload)?)),
            EVENT_READ_RECEIPT => Ok(Self::ReadReceipt(de(name, payload)?)),
            EVENT_DELIVERY_RECEIPT => Ok(Self::DeliveryReceipt(de(name, payload)?)),
            EVENT_CHANGE_GROUP_NAME => Ok(Self::ChangeGroupName(de(name, payload)?)),
            EVENT_DELETE_GROUP => Ok(Self::DeleteGroup(de(name, payload)?)),
            EVENT_DELETE_MESSAGE => Ok(Self::DeleteMessage(de(name, payload)?)),
            EVENT_CHANGE_TAG => Ok(Self::ChangeTag(de(name, payload)?)),
            other => Err(WireError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => EVENT_MESSAGE,
            Self::Typing(_) => EVENT_TYPING,
            Self::ReadReceipt(_) => EVENT_READ_RECEIPT,
            Self::DeliveryReceipt(_) => EVENT_DELIVERY_RECEIPT,
            Self::ChangeGroupName(_) => EVENT_CHANGE_GROUP_NAME,
            Self::DeleteGroup(_) => EVENT_DELETE_GROUP,
            Self::DeleteMessage(_) => EVENT_DELETE_MESSAGE,
            Self::ChangeTag(_) => EVENT_CHANGE_TAG,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope framing
// ---------------------------------------------------------------------------

/// Client→hub frame. `seq` correlates the hub's acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub payload: Value,
}

/// Hub→client frame: either an acknowledgement of a client call or a pushed
/// event. Distinguished by the `ack` versus `event` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HubFrame {
    Ack {
        ack: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<String>,
    },
    Push { event: String, payload: Value },
}
