//! MeshChat Core
//!
//! Foundational types for the MeshChat local peer-to-peer chat: peer
//! identities, the local mesh transport contract, the peer registry, the
//! append-only message log, configuration and errors. The session controller
//! that drives these lives in `meshchat-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod message;
pub mod registry;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    create_command_channel, ChatSnapshot, Command, CommandReceiver, CommandSender,
    DiscoveryStatus, SendOutcome,
};
pub use config::{ChannelConfig, MeshConfig};
pub use errors::{MeshError, MeshResult, SessionError, TransportError};
pub use message::{
    decode_text, encode_text, Message, MessageId, MessageLog, MessageLogEntry, Sender, SELF_LABEL,
};
pub use registry::{ConnectionState, PeerRegistry, RegistryChange};
pub use transport::{
    create_event_channel, InvitationReply, InvitationResponder, MeshTransport, SendMode,
    SessionHandle, TransportEvent, TransportEventReceiver, TransportEventSender,
};
pub use types::{PeerIdentity, ServiceType, SessionId, SystemTimeSource, TimeSource, Timestamp};
