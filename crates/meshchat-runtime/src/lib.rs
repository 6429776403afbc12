//! MeshChat Runtime Engine
//!
//! This crate drives the MeshChat core:
//! - `SessionController`: session lifecycle, discovery, invitation policy and
//!   reconnection
//! - `MessageExchange`: text payloads in and out of the message log
//! - `CoreLoopTask`: the single task that serializes every mutation
//! - `RuntimeBuilder` / `RuntimeHandle`: the API the UI side talks to
//!
//! `meshchat-core` provides the types and the transport contract; a transport
//! implementation is supplied by the caller.

pub mod builder;
pub mod logic;

pub use builder::{RuntimeBuilder, RuntimeHandle};
pub use logic::{
    ControllerStats, CoreLoopTask, MessageExchange, SessionController, SnapshotReceiver,
    SnapshotSender,
};

// Re-export core types for convenience
pub use meshchat_core::{
    ChatSnapshot, DiscoveryStatus, MeshConfig, MeshError, MeshResult, MessageLogEntry,
    PeerIdentity, SendOutcome, SessionId,
};
