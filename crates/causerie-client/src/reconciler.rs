//! History reconciliation decisions.
//!
//! Two concerns: backfilling older history when a thinly-held linkman gains
//! focus, and the periodic update-history signal that keeps the hub's
//! read-position bookkeeping current. Both are pure decision functions; the
//! engine performs the actual fetches.

use tracing::debug;

use causerie_shared::constants::HISTORY_BACKFILL_THRESHOLD;
use causerie_shared::protocol::{HistoryRequest, UpdateHistoryRequest};
use causerie_shared::types::{LinkmanId, MessageId};
use causerie_store::SessionState;

/// Decide whether focusing `linkman_id` warrants an older-history request.
/// The held count doubles as the fetch cursor.
pub fn backfill_request(state: &SessionState, linkman_id: &LinkmanId) -> Option<HistoryRequest> {
    let linkman = state.linkman(linkman_id)?;
    let held = linkman.messages.len();
    if held >= HISTORY_BACKFILL_THRESHOLD {
        return None;
    }
    Some(HistoryRequest {
        linkman_id: linkman_id.clone(),
        exist_count: held,
    })
}

/// Tracks the newest message id last reported upstream, so the periodic tick
/// only fires when something actually changed.
#[derive(Debug, Default)]
pub struct Reconciler {
    last_pushed: Option<(LinkmanId, MessageId)>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether this tick owes the hub an update-history call.
    ///
    /// `captured` is the focus at the moment the tick fired; a tick that
    /// outlived a focus change is stale and must be a no-op. Skipped entirely
    /// while the window is backgrounded. The call itself is idempotent
    /// (last-write-wins on the hub), so racing ticks are harmless.
    pub fn update_history_due(
        &mut self,
        state: &SessionState,
        foregrounded: bool,
        captured: Option<&LinkmanId>,
    ) -> Option<UpdateHistoryRequest> {
        if !foregrounded {
            return None;
        }
        let focus = state.focus.as_ref()?;
        if captured != Some(focus) {
            debug!(captured = ?captured, focus = %focus, "Stale update-history tick, skipping");
            return None;
        }

        let newest = state.linkman(focus)?.messages.newest()?.id.clone();
        if self.last_pushed.as_ref() == Some(&(focus.clone(), newest.clone())) {
            return None;
        }

        self.last_pushed = Some((focus.clone(), newest.clone()));
        Some(UpdateHistoryRequest {
            linkman_id: focus.clone(),
            message_id: newest,
        })
    }

    pub fn reset(&mut self) {
        self.last_pushed = None;
    }
}
