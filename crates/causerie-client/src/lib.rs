//! # causerie-client
//!
//! The real-time synchronization engine: session bootstrap, inbound event
//! routing, the outbound message pipeline, ephemeral presence tracking and
//! history reconciliation, all driving the Conversation Store from one
//! sequential event loop.

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod notify;
pub mod outbound;
pub mod presence;
pub mod reconciler;
pub mod router;

mod error;

pub use config::EngineConfig;
pub use engine::{start, Engine, EngineHandle, Intent};
pub use error::EngineError;
pub use notify::{Notifier, NullNotifier, SideEffect};
pub use outbound::{PassthroughUploader, Uploader};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing for an embedding application (respects `RUST_LOG`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("causerie_client=debug,causerie_net=debug,causerie_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
