//! Peer registry
//!
//! The authoritative roster of connected peers. It is mutated only by the
//! session controller and keeps two invariants regardless of event ordering
//! or duplicate delivery: a peer appears at most once, and a peer whose last
//! transition was not `Connected` is never listed as connected.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::trace;

use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Per-peer connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    NotConnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::NotConnected => "not-connected",
        };
        f.write_str(name)
    }
}

/// Effect of applying a transition to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Added,
    Removed,
    Unchanged,
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

/// Connected peers in connection order, plus peers with an invitation in flight
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    connected: Vec<PeerIdentity>,
    pending: HashSet<PeerIdentity>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a connection-state transition for `peer`
    pub fn apply(&mut self, peer: &PeerIdentity, state: ConnectionState) -> RegistryChange {
        match state {
            ConnectionState::Connecting => {
                if !self.is_connected(peer) {
                    self.pending.insert(peer.clone());
                }
                RegistryChange::Unchanged
            }
            ConnectionState::Connected => {
                self.pending.remove(peer);
                if self.is_connected(peer) {
                    trace!(peer = %peer, "ignoring duplicate connected transition");
                    RegistryChange::Unchanged
                } else {
                    self.connected.push(peer.clone());
                    RegistryChange::Added
                }
            }
            ConnectionState::NotConnected => {
                self.pending.remove(peer);
                match self.connected.iter().position(|p| p == peer) {
                    Some(index) => {
                        self.connected.remove(index);
                        RegistryChange::Removed
                    }
                    None => {
                        trace!(peer = %peer, "ignoring disconnect for unlisted peer");
                        RegistryChange::Unchanged
                    }
                }
            }
        }
    }

    /// Record that an invitation to `peer` is in flight
    pub fn mark_pending(&mut self, peer: &PeerIdentity) {
        if !self.is_connected(peer) {
            self.pending.insert(peer.clone());
        }
    }

    /// Forget an in-flight invitation without a state transition
    pub fn clear_pending(&mut self, peer: &PeerIdentity) -> bool {
        self.pending.remove(peer)
    }

    pub fn is_connected(&self, peer: &PeerIdentity) -> bool {
        self.connected.contains(peer)
    }

    pub fn is_pending(&self, peer: &PeerIdentity) -> bool {
        self.pending.contains(peer)
    }

    /// Connected or connecting
    pub fn is_tracked(&self, peer: &PeerIdentity) -> bool {
        self.is_connected(peer) || self.is_pending(peer)
    }

    pub fn state_of(&self, peer: &PeerIdentity) -> Option<ConnectionState> {
        if self.is_connected(peer) {
            Some(ConnectionState::Connected)
        } else if self.is_pending(peer) {
            Some(ConnectionState::Connecting)
        } else {
            None
        }
    }

    /// Connected peers in the order they connected
    pub fn peers(&self) -> &[PeerIdentity] {
        &self.connected
    }

    pub fn len(&self) -> usize {
        self.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }

    /// Drop every entry; used when the session is replaced
    pub fn clear(&mut self) {
        self.connected.clear();
        self.pending.clear();
    }
}
