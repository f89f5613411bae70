//! Local send cooldown after a mute/ban rejection.

use std::time::{Duration, Instant};

use tracing::debug;

/// Tracks the client-known "muted/banned" state of the channel.
///
/// When the hub acknowledges a send with the mute sentinel, the gate arms for
/// a fixed cooldown window. While armed, message sends short-circuit locally
/// with the same error, shedding load off the hub and giving the sender
/// immediate feedback.
#[derive(Debug, Clone)]
pub struct SendGate {
    cooldown: Duration,
    muted_until: Option<Instant>,
}

impl SendGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            muted_until: None,
        }
    }

    /// Arm the cooldown window starting at `now`.
    pub fn trip(&mut self, now: Instant) {
        debug!(cooldown_secs = self.cooldown.as_secs(), "Send gate armed");
        self.muted_until = Some(now + self.cooldown);
    }

    /// Whether sends must short-circuit locally at `now`.
    pub fn is_blocked(&self, now: Instant) -> bool {
        match self.muted_until {
            Some(until) => now < until,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_blocks_during_cooldown() {
        let mut gate = SendGate::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(!gate.is_blocked(now));
        gate.trip(now);
        assert!(gate.is_blocked(now));
        assert!(gate.is_blocked(now + Duration::from_secs(59)));
        assert!(!gate.is_blocked(now + Duration::from_secs(61)));
    }

    #[test]
    fn test_retrip_extends_window() {
        let mut gate = SendGate::new(Duration::from_secs(60));
        let now = Instant::now();

        gate.trip(now);
        gate.trip(now + Duration::from_secs(30));
        assert!(gate.is_blocked(now + Duration::from_secs(80)));
        assert!(!gate.is_blocked(now + Duration::from_secs(91)));
    }
}
