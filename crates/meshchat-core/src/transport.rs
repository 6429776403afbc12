//! Local mesh transport contract
//!
//! MeshChat does not implement discovery broadcast, encrypted links or framing
//! itself. It drives a [`MeshTransport`] and consumes the [`TransportEvent`]s
//! that transport pushes into the channel bound with
//! [`MeshTransport::attach_events`].

use async_trait::async_trait;
use core::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;
use crate::errors::MeshResult;
use crate::registry::ConnectionState;
use crate::types::{PeerIdentity, ServiceType, SessionId};

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Token for a live transport session
///
/// The transport owns the real session resources; this handle only names the
/// session and the local identity it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
    local: PeerIdentity,
}

impl SessionHandle {
    pub fn new(id: SessionId, local: PeerIdentity) -> Self {
        Self { id, local }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }
}

/// Delivery mode for `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    #[default]
    Reliable,
}

// ----------------------------------------------------------------------------
// Invitations
// ----------------------------------------------------------------------------

/// Answer to an incoming invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationReply {
    /// Join the inviter, attaching the given local session
    Accept(SessionHandle),
    Decline,
}

/// One-shot responder handed to the core with an incoming invitation
#[derive(Debug)]
pub struct InvitationResponder {
    reply: oneshot::Sender<InvitationReply>,
}

impl InvitationResponder {
    /// Create a responder and the receiver the transport waits on
    pub fn new() -> (Self, oneshot::Receiver<InvitationReply>) {
        let (reply, receiver) = oneshot::channel();
        (Self { reply }, receiver)
    }

    /// Accept the invitation into `session`. Returns false when the transport
    /// has already given up waiting.
    pub fn accept(self, session: &SessionHandle) -> bool {
        self.reply
            .send(InvitationReply::Accept(session.clone()))
            .is_ok()
    }

    pub fn decline(self) -> bool {
        self.reply.send(InvitationReply::Decline).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Events pushed by a transport into the core loop
#[derive(Debug)]
pub enum TransportEvent {
    /// A nearby peer advertising our service became visible
    PeerFound { peer: PeerIdentity },
    /// A previously visible peer stopped being discoverable
    PeerLost { peer: PeerIdentity },
    /// A peer changed connection state within `session`
    ConnectionStateChanged {
        session: SessionId,
        peer: PeerIdentity,
        state: ConnectionState,
    },
    /// A payload arrived from `from` over `session`
    DataReceived {
        session: SessionId,
        from: PeerIdentity,
        payload: Vec<u8>,
    },
    /// A remote peer asks to join our session
    InvitationReceived {
        peer: PeerIdentity,
        responder: InvitationResponder,
    },
    AdvertisingFailed { reason: String },
    BrowsingFailed { reason: String },
}

impl TransportEvent {
    /// Session the event belongs to, for session-scoped events
    pub fn session(&self) -> Option<SessionId> {
        match self {
            TransportEvent::ConnectionStateChanged { session, .. }
            | TransportEvent::DataReceived { session, .. } => Some(*session),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::PeerFound { .. } => "peer_found",
            TransportEvent::PeerLost { .. } => "peer_lost",
            TransportEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            TransportEvent::DataReceived { .. } => "data_received",
            TransportEvent::InvitationReceived { .. } => "invitation_received",
            TransportEvent::AdvertisingFailed { .. } => "advertising_failed",
            TransportEvent::BrowsingFailed { .. } => "browsing_failed",
        }
    }
}

pub type TransportEventSender = mpsc::Sender<TransportEvent>;
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

/// Create bounded event channel (transport → core loop)
pub fn create_event_channel(config: &ChannelConfig) -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Advertise/browse, invitation and datagram primitives of a local mesh
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Bind the channel that receives this transport's events
    fn attach_events(&mut self, events: TransportEventSender);

    /// Announce `local` as discoverable under `service`
    async fn start_advertising(&self, local: &PeerIdentity, service: &ServiceType) -> MeshResult<()>;

    async fn stop_advertising(&self) -> MeshResult<()>;

    /// Scan for peers advertising `service`
    async fn start_browsing(&self, local: &PeerIdentity, service: &ServiceType) -> MeshResult<()>;

    async fn stop_browsing(&self) -> MeshResult<()>;

    /// Open a fresh session bound to `local`
    async fn create_session(&self, local: &PeerIdentity) -> MeshResult<SessionHandle>;

    /// Drop every connection of `session`
    async fn disconnect(&self, session: &SessionHandle) -> MeshResult<()>;

    /// Invite `peer` into `session`; the outcome arrives later as a
    /// `ConnectionStateChanged` event. `timeout` bounds the wait for an answer.
    async fn invite(
        &self,
        peer: &PeerIdentity,
        session: &SessionHandle,
        timeout: Duration,
    ) -> MeshResult<()>;

    /// Send one payload to each of `to` over `session`
    async fn send(
        &self,
        session: &SessionHandle,
        payload: &[u8],
        to: &[PeerIdentity],
        mode: SendMode,
    ) -> MeshResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_data_events_are_session_scoped() {
        let peer = PeerIdentity::new("bob");
        let scoped = TransportEvent::DataReceived {
            session: SessionId::new(3),
            from: peer.clone(),
            payload: b"hi".to_vec(),
        };
        assert_eq!(scoped.session(), Some(SessionId::new(3)));

        let unscoped = TransportEvent::PeerFound { peer };
        assert_eq!(unscoped.session(), None);
        assert_eq!(unscoped.kind(), "peer_found");
    }

    #[tokio::test]
    async fn responder_delivers_accept() {
        let local = PeerIdentity::new("alice");
        let session = SessionHandle::new(SessionId::new(1), local);
        let (responder, receiver) = InvitationResponder::new();

        assert!(responder.accept(&session));
        assert_eq!(receiver.await.unwrap(), InvitationReply::Accept(session));
    }

    #[tokio::test]
    async fn responder_reports_abandoned_invitation() {
        let (responder, receiver) = InvitationResponder::new();
        drop(receiver);
        assert!(!responder.decline());
    }
}
