//! Inbound event routing.
//!
//! Stateless dispatch from a parsed [`ServerEvent`] to the matching store
//! transition. Handlers are pure with respect to the store: old state plus
//! event gives new state, and side effects come back as an explicit
//! post-commit list for the engine to run — after the transition, never
//! before, never blocking it.

use tracing::debug;

use causerie_shared::protocol::{MessageKind, ServerEvent, WireMessage};
use causerie_store::{Linkman, Message, SessionState};

use crate::notify::SideEffect;
use crate::presence::{ReceiptIndex, ReceiptStatus};

/// Apply one pushed event to the store and collect post-commit effects.
pub fn route(
    state: &mut SessionState,
    receipts: &mut ReceiptIndex,
    event: ServerEvent,
) -> Vec<SideEffect> {
    match event {
        ServerEvent::Message(wire) => on_message(state, wire),

        ServerEvent::Typing(typing) => {
            state.set_typing_status(
                &typing.linkman_id,
                &typing.user_id,
                &typing.username,
                typing.is_typing,
            );
            Vec::new()
        }

        ServerEvent::ReadReceipt(receipt) => {
            receipts.apply(&receipt.message_id, &receipt.user_id, ReceiptStatus::Read);
            Vec::new()
        }

        ServerEvent::DeliveryReceipt(receipt) => {
            receipts.apply(
                &receipt.message_id,
                &receipt.user_id,
                ReceiptStatus::Delivered,
            );
            Vec::new()
        }

        ServerEvent::ChangeGroupName(change) => {
            state.rename_linkman(&change.group_id, &change.name);
            Vec::new()
        }

        ServerEvent::DeleteGroup(deleted) => {
            state.remove_linkman(&deleted.group_id);
            Vec::new()
        }

        ServerEvent::DeleteMessage(deleted) => {
            state.delete_message(&deleted.linkman_id, &deleted.message_id, deleted.hard);
            Vec::new()
        }

        ServerEvent::ChangeTag(change) => {
            state.restamp_sender_tag(&change.user_id, &change.tag);
            Vec::new()
        }
    }
}

/// Message-received handling.
///
/// An unknown linkman from a non-self sender opens a temporary DM seeded with
/// the message and an async history backfill; a self-authored message for an
/// unknown linkman is dropped, which closes the self-originated duplication
/// race. A known linkman appends and lets the store do unread accounting.
fn on_message(state: &mut SessionState, mut wire: WireMessage) -> Vec<SideEffect> {
    normalize_content(&mut wire);

    let linkman_id = wire.to.clone();
    let self_authored = state.self_id() == Some(&wire.from.id);
    let mut effects = Vec::new();

    if state.linkman(&linkman_id).is_none() {
        if self_authored {
            debug!(linkman = %linkman_id, "Own message for unknown linkman, dropping");
            return effects;
        }

        let linkman = Linkman::temporary(
            linkman_id.clone(),
            wire.from.username.clone(),
            wire.from.avatar.clone(),
            wire.create_time,
        );
        state.insert_linkman(linkman);
        effects.push(SideEffect::BackfillHistory {
            linkman_id: linkman_id.clone(),
        });
    }

    let message = Message::from_wire(wire);
    let message_id = message.id.clone();
    let sender_name = message.sender.username.clone();
    let preview = preview(&message);
    let focused = state.is_focused(&linkman_id);

    if !state.add_linkman_message(&linkman_id, message) {
        // Duplicate or stale: nothing committed, nothing to announce.
        return effects;
    }

    if !self_authored {
        effects.push(if focused {
            SideEffect::SendReadReceipt {
                linkman_id: linkman_id.clone(),
                message_id,
            }
        } else {
            SideEffect::SendDeliveryReceipt {
                linkman_id: linkman_id.clone(),
                message_id,
            }
        });

        effects.push(SideEffect::Notify {
            title: sender_name.clone(),
            body: preview.clone(),
        });
        effects.push(SideEffect::PlaySound);
        effects.push(SideEffect::Speak {
            text: format!("{sender_name}: {preview}"),
        });
    }

    effects
}

/// Recompute derived display fields, idempotently: line endings are
/// normalized so the renderer never sees carriage returns.
fn normalize_content(wire: &mut WireMessage) {
    if wire.kind == MessageKind::Text && wire.content.contains('\r') {
        wire.content = wire.content.replace("\r\n", "\n").replace('\r', "\n");
    }
}

/// Short notification body for a message.
fn preview(message: &Message) -> String {
    match message.kind {
        MessageKind::Text => message.content.chars().take(60).collect(),
        MessageKind::Image => "[image]".to_string(),
        MessageKind::File => "[file]".to_string(),
        MessageKind::Code => "[code]".to_string(),
        MessageKind::System => "[system]".to_string(),
        MessageKind::InviteV2 => "[group invite]".to_string(),
    }
}
