use thiserror::Error;

use causerie_net::ChannelError;
use causerie_shared::WireError;

/// Errors produced by the engine layer.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The hub channel failed or rejected a call.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A payload that did not match the protocol shape.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Session bootstrap could not complete, even as guest.
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
