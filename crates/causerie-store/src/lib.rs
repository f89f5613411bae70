//! # causerie-store
//!
//! The Conversation Store: an in-memory, normalized map of linkmans to
//! ordered message maps. This is the single source of truth the rest of the
//! client renders from. It is mutated exclusively through the reducer-style
//! transitions in [`transitions`], which are total functions, free of side
//! effects, and applied sequentially by the engine's event loop.

pub mod message_map;
pub mod models;
pub mod state;
pub mod transitions;

pub use message_map::MessageMap;
pub use models::{Message, MessagePatch};
pub use state::{
    ChannelInfo, CommunityInfo, GroupInfo, Linkman, LinkmanVariant, RosterSnapshot, SessionState,
    SnapshotLinkman,
};
