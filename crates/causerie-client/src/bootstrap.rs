//! Session bootstrap.
//!
//! Runs in full after every connect: authenticate (token resume, degrading to
//! guest provisioning), fetch the batched last-message-per-linkman seed for
//! the whole roster, and assemble everything into one [`RosterSnapshot`] so
//! the store can be populated in a single atomic transition — the rest of the
//! client never sees a half-populated roster.

use std::collections::HashMap;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causerie_net::{call, ChannelCommand};
use causerie_shared::protocol::{
    LastMessagesEntry, LastMessagesRequest, LoginRequest, RegisterRequest, SessionResponse,
    CALL_GET_LINKMANS_LAST_MESSAGES, CALL_GUEST, CALL_LOGIN, CALL_REGISTER,
};
use causerie_shared::types::LinkmanId;
use causerie_store::{Linkman, Message, RosterSnapshot, SnapshotLinkman};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Authenticate and fetch the resume state.
///
/// A failed token resume is not fatal: it degrades to guest provisioning and
/// the snapshot records the fallback so the engine can surface it. Only a
/// guest call that also fails is an error, and the caller just waits for the
/// next reconnect.
pub async fn bootstrap(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    config: &EngineConfig,
) -> Result<RosterSnapshot> {
    let (session, guest_fallback) = authenticate(cmd_tx, config).await?;

    let ids: Vec<LinkmanId> = session.linkmans.iter().map(|entry| entry.id.clone()).collect();
    let mut seeds: HashMap<LinkmanId, LastMessagesEntry> = if ids.is_empty() {
        HashMap::new()
    } else {
        call(
            cmd_tx,
            CALL_GET_LINKMANS_LAST_MESSAGES,
            &LastMessagesRequest { linkmans: ids },
        )
        .await
        .map_err(EngineError::Channel)?
    };

    let linkmans = session
        .linkmans
        .into_iter()
        .map(|entry| {
            let (messages, unread) = match seeds.remove(&entry.id) {
                Some(seed) => (
                    seed.messages.into_iter().map(Message::from_wire).collect(),
                    seed.unread,
                ),
                None => {
                    debug!(linkman = %entry.id, "No seed history for roster entry");
                    (Vec::new(), 0)
                }
            };
            SnapshotLinkman {
                linkman: Linkman::from_roster(entry),
                messages,
                unread,
            }
        })
        .collect();

    info!(
        user = ?session.user.as_ref().map(|u| u.username.as_str()),
        guest_fallback,
        "Session bootstrap complete"
    );

    Ok(RosterSnapshot {
        user: session.user,
        linkmans,
        guest_fallback,
    })
}

async fn authenticate(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    config: &EngineConfig,
) -> Result<(SessionResponse, bool)> {
    if let Some(token) = config.token.as_deref() {
        match call::<_, SessionResponse>(
            cmd_tx,
            CALL_LOGIN,
            &LoginRequest {
                token: token.to_string(),
            },
        )
        .await
        {
            Ok(session) => return Ok((session, false)),
            Err(e) => {
                warn!(error = %e, "Token resume failed, falling back to guest");
                let session = guest(cmd_tx).await?;
                return Ok((session, true));
            }
        }
    }

    Ok((guest(cmd_tx).await?, false))
}

async fn guest(cmd_tx: &mpsc::Sender<ChannelCommand>) -> Result<SessionResponse> {
    call(cmd_tx, CALL_GUEST, &json!({}))
        .await
        .map_err(|e| EngineError::Bootstrap(format!("guest provisioning failed: {e}")))
}

/// Create a new account. The hub answers with the same session shape as a
/// login; feeding it through the snapshot path is the caller's next step.
pub async fn register(
    cmd_tx: &mpsc::Sender<ChannelCommand>,
    username: &str,
    password: &str,
) -> Result<SessionResponse> {
    call(
        cmd_tx,
        CALL_REGISTER,
        &RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        },
    )
    .await
    .map_err(EngineError::Channel)
}
