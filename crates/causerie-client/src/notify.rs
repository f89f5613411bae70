//! Post-commit side effects.
//!
//! The event router computes these while transitioning the store; the engine
//! runs them strictly after the transition commits. Alert effects are
//! best-effort: a failed notification is logged and never retried.

use tracing::warn;

use causerie_shared::types::{LinkmanId, MessageId};

/// An effect to run after a store transition has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Desktop notification (backgrounded window + toggle gated).
    Notify { title: String, body: String },
    /// Notification sound (backgrounded window + toggle gated).
    PlaySound,
    /// Voice read-aloud (backgrounded window + toggle gated).
    Speak { text: String },
    /// Failure or policy feedback for the local user, always shown.
    Toast { text: String },
    /// Fetch recent history for a just-created temporary linkman.
    BackfillHistory { linkman_id: LinkmanId },
    /// Advisory delivery receipt, fire-and-forget.
    SendDeliveryReceipt {
        linkman_id: LinkmanId,
        message_id: MessageId,
    },
    /// Advisory read receipt, fire-and-forget.
    SendReadReceipt {
        linkman_id: LinkmanId,
        message_id: MessageId,
    },
}

/// Boundary to the platform's notification/sound/voice facilities.
///
/// Implementations are expected to be cheap and non-blocking; the engine
/// tolerates every call being skipped.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()>;
    fn play_sound(&self) -> anyhow::Result<()>;
    fn speak(&self, text: &str) -> anyhow::Result<()>;
    fn toast(&self, text: &str) -> anyhow::Result<()>;
}

/// Notifier that drops everything. Useful headless and in tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _title: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn play_sound(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn speak(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
    fn toast(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Gating for alert effects: each is independently toggled, and none fire
/// while the window is foregrounded. Toasts always show.
#[derive(Debug, Clone, Copy)]
pub struct EffectGate {
    pub window_foreground: bool,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
    pub voice_enabled: bool,
}

impl EffectGate {
    pub fn allows(&self, effect: &SideEffect) -> bool {
        match effect {
            SideEffect::Notify { .. } => !self.window_foreground && self.notifications_enabled,
            SideEffect::PlaySound => !self.window_foreground && self.sound_enabled,
            SideEffect::Speak { .. } => !self.window_foreground && self.voice_enabled,
            SideEffect::Toast { .. } => true,
            // Network effects are not alert effects; the engine dispatches
            // them unconditionally.
            _ => true,
        }
    }
}

/// Run one alert effect through the notifier, best-effort.
pub fn run_alert_effect(notifier: &dyn Notifier, effect: &SideEffect) {
    let result = match effect {
        SideEffect::Notify { title, body } => notifier.notify(title, body),
        SideEffect::PlaySound => notifier.play_sound(),
        SideEffect::Speak { text } => notifier.speak(text),
        SideEffect::Toast { text } => notifier.toast(text),
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!(error = %e, "Alert effect failed, skipping");
    }
}
