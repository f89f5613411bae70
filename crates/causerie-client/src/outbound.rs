//! Outbound message pipeline.
//!
//! Per-message state machine: `Composing → Optimistic(loading=true) →
//! {Persisted(loading=false) | Failed(removed or marked)}`. The optimistic
//! insert happens synchronously before any network round-trip so the sender
//! sees their message instantly; the hub's acknowledgement either rekeys the
//! placeholder to the authoritative message or rolls it back. There is no
//! retry-from-failed — the user re-invokes send.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use causerie_net::{call, ChannelCommand, ChannelError};
use causerie_shared::invite::{parse_invite_link, InviteV2Content};
use causerie_shared::protocol::{
    MessageKind, SendMessageRequest, UserProfile, WireMessage, CALL_SEND_MESSAGE,
};
use causerie_shared::types::{LinkmanId, MessageId};
use causerie_store::{Message, MessagePatch, SessionState};

use crate::notify::SideEffect;

/// Object-store boundary for media attachments. External collaborator:
/// assumed reliable within its own retry policy.
pub trait Uploader: Send + Sync {
    /// Upload a local blob reference, resolving to the durable URL.
    fn upload(&self, local_ref: &str) -> BoxFuture<'static, anyhow::Result<String>>;
}

/// Uploader that treats the local reference as already durable. Useful in
/// tests and for hubs that accept client-hosted references.
pub struct PassthroughUploader;

impl Uploader for PassthroughUploader {
    fn upload(&self, local_ref: &str) -> BoxFuture<'static, anyhow::Result<String>> {
        let url = local_ref.to_string();
        Box::pin(async move { Ok(url) })
    }
}

/// Build the optimistic message for a send intent.
///
/// Applies the invite transform: text whose whole body is a group invite link
/// becomes a structured `inviteV2` message before the insert, so the local
/// echo already shows the structured card.
pub fn build_optimistic(
    user: &UserProfile,
    to: &LinkmanId,
    kind: MessageKind,
    content: String,
    now: DateTime<Utc>,
) -> Message {
    let (kind, content) = match kind {
        MessageKind::Text => match parse_invite_link(&content) {
            Some(group) => {
                debug!(group = %group, "Transforming invite link into inviteV2");
                let invite = InviteV2Content {
                    group,
                    inviter: user.id.clone(),
                    inviter_name: user.username.clone(),
                };
                (MessageKind::InviteV2, invite.to_content())
            }
            None => (MessageKind::Text, content),
        },
        other => (other, content),
    };

    Message {
        id: MessageId::placeholder(to, now.timestamp_millis()),
        kind,
        content,
        sender: user.to_sender(),
        create_time: now,
        loading: true,
        deleted: false,
        failed: false,
    }
}

/// Transmit a send to the hub and await the authoritative message.
pub async fn transmit(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    to: &LinkmanId,
    kind: MessageKind,
    content: &str,
) -> Result<WireMessage, ChannelError> {
    call(
        cmd_tx,
        CALL_SEND_MESSAGE,
        &SendMessageRequest {
            to: to.clone(),
            kind,
            content: content.to_string(),
        },
    )
    .await
}

/// Reconcile the hub's response with the optimistic placeholder.
///
/// Success rekeys the placeholder to the authoritative message. Failure rolls
/// the placeholder back — except on the media path, where the upload already
/// succeeded and the preview stays meaningful: there the message is kept and
/// marked failed in place. Either failure surfaces to the sender only.
pub fn resolve_send(
    state: &mut SessionState,
    linkman: &LinkmanId,
    placeholder: &MessageId,
    result: Result<WireMessage, ChannelError>,
    media: bool,
) -> Option<SideEffect> {
    match result {
        Ok(wire) => {
            state.update_message(linkman, placeholder, MessagePatch::from_wire(wire));
            None
        }
        Err(e) => {
            if media {
                mark_failed(state, linkman, placeholder);
            } else {
                state.delete_message(linkman, placeholder, true);
            }
            Some(SideEffect::Toast {
                text: format!("Message was not sent: {e}"),
            })
        }
    }
}

/// Mark an optimistic message failed in place, clearing the loading spinner
/// but preserving the authored content for a manual retry.
pub fn mark_failed(state: &mut SessionState, linkman: &LinkmanId, placeholder: &MessageId) {
    state.update_message(
        linkman,
        placeholder,
        MessagePatch {
            loading: Some(false),
            failed: Some(true),
            ..Default::default()
        },
    );
}
