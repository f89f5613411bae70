// Hub connection layer: WebSocket transport with auto-reconnect, acked emits
// and the local mute cooldown gate.

pub mod backoff;
pub mod channel;
pub mod gate;

mod error;

pub use backoff::Backoff;
pub use channel::{
    call, emit, spawn_channel, AckReply, ChannelCommand, ChannelConfig, ChannelNotification,
};
pub use error::ChannelError;
pub use gate::SendGate;
