//! Domain model structs held in the in-memory conversation store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a rendering layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use causerie_shared::protocol::{MessageKind, SenderInfo, WireMessage};
use causerie_shared::types::MessageId;

/// A single chat message as the client holds it.
///
/// Differs from the wire shape by the client-only lifecycle flags: `loading`
/// while an optimistic send awaits its acknowledgement, `failed` when a media
/// upload succeeded locally but persisting did not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Hub-assigned identifier, or a `local:` placeholder before the ack.
    pub id: MessageId,
    pub kind: MessageKind,
    /// Opaque content string; structure depends on `kind`.
    pub content: String,
    /// Sender snapshot, denormalized at send time.
    pub sender: SenderInfo,
    /// When the message was created (ordering key).
    pub create_time: DateTime<Utc>,
    /// True while an optimistic send awaits the hub's acknowledgement.
    pub loading: bool,
    /// Soft-delete tombstone. Content clearing is the renderer's job.
    pub deleted: bool,
    /// Set when a send reached a terminal failure but the authored content is
    /// worth keeping visible (media upload path).
    pub failed: bool,
}

impl Message {
    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            kind: wire.kind,
            content: wire.content,
            sender: wire.from,
            create_time: wire.create_time,
            loading: false,
            deleted: wire.deleted,
            failed: false,
        }
    }
}

/// Partial update applied to a held message.
///
/// A patch carrying a new identifier is a rekey: the entry moves from its
/// placeholder key to the hub-assigned one. All other fields merge in place.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub id: Option<MessageId>,
    pub content: Option<String>,
    pub create_time: Option<DateTime<Utc>>,
    pub loading: Option<bool>,
    pub failed: Option<bool>,
}

impl MessagePatch {
    /// Patch that replaces a placeholder with the hub's authoritative message.
    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: Some(wire.id),
            content: Some(wire.content),
            create_time: Some(wire.create_time),
            loading: Some(false),
            failed: None,
        }
    }

    pub fn apply_to(&self, message: &mut Message) {
        if let Some(ref id) = self.id {
            message.id = id.clone();
        }
        if let Some(ref content) = self.content {
            message.content = content.clone();
        }
        if let Some(create_time) = self.create_time {
            message.create_time = create_time;
        }
        if let Some(loading) = self.loading {
            message.loading = loading;
        }
        if let Some(failed) = self.failed {
            message.failed = failed;
        }
    }
}
