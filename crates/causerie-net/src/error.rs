use thiserror::Error;

use causerie_shared::constants::ERR_SENDER_MUTED;

/// Errors surfaced to callers of the channel's emit path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is between connections; the call never left the client.
    #[error("Channel is not connected")]
    NotConnected,

    /// The sender is muted/banned and the local cooldown is active, or the
    /// hub just said so. Either way the send terminates here.
    #[error("Sender is muted")]
    Muted,

    /// The hub acknowledged the call with an error string.
    #[error("Hub rejected call: {0}")]
    Rejected(String),

    /// The connection failed mid-call; the call may or may not have reached
    /// the hub.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame that could not be serialized or parsed.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The channel task is gone.
    #[error("Channel task has shut down")]
    Closed,
}

impl ChannelError {
    /// Map a hub error string, folding the mute sentinel into [`Self::Muted`].
    pub fn from_hub_error(err: String) -> Self {
        if err == ERR_SENDER_MUTED {
            Self::Muted
        } else {
            Self::Rejected(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
