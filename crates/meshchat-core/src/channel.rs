//! Channel message types between the UI collaborator and the core loop
//!
//! Commands flow UI → core over a bounded mpsc channel. State flows back as
//! versioned [`ChatSnapshot`]s published on a watch channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;
use crate::errors::MeshResult;
use crate::message::MessageLogEntry;
use crate::types::{PeerIdentity, SessionId};

// ----------------------------------------------------------------------------
// Command: UI → Core
// ----------------------------------------------------------------------------

/// Commands accepted by the core loop
#[derive(Debug)]
pub enum Command {
    /// Broadcast a text message to every connected peer
    SendText {
        body: String,
        reply: Option<oneshot::Sender<SendOutcome>>,
    },
    /// Replace the current session with a fresh one
    Reset {
        reply: Option<oneshot::Sender<MeshResult<SessionId>>>,
    },
    /// Stop discovery, disconnect and end the loop
    Shutdown,
}

/// Result of a `send_text` request. Never an error: failures are absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// Handed to the transport for this many peers and logged locally
    Delivered { recipients: usize },
    /// Nobody connected; nothing sent, nothing logged
    NoPeers,
    /// Rejected locally or by the transport; nothing logged
    Failed,
}

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;

/// Create bounded command channel (UI → core loop)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

// ----------------------------------------------------------------------------
// Observable State: Core → UI
// ----------------------------------------------------------------------------

/// Whether advertising and browsing are currently running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub advertising: bool,
    pub browsing: bool,
}

/// Immutable view of the core state, republished after every change
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    /// Increases by one with every publication
    pub version: u64,
    pub local: PeerIdentity,
    /// Current session, once one exists
    pub session: Option<SessionId>,
    /// Connected peers in connection order
    pub connected_peers: Vec<PeerIdentity>,
    pub messages: Arc<Vec<MessageLogEntry>>,
    pub discovery: DiscoveryStatus,
}

impl ChatSnapshot {
    pub fn initial(local: PeerIdentity) -> Self {
        Self {
            version: 0,
            local,
            session: None,
            connected_peers: Vec::new(),
            messages: Arc::new(Vec::new()),
            discovery: DiscoveryStatus::default(),
        }
    }

    pub fn connected_peer_count(&self) -> usize {
        self.connected_peers.len()
    }
}
