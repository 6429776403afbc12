//! In-process local mesh
//!
//! Simulates the advertise/browse, invitation, link and datagram behaviour of
//! a local-network mesh between several nodes living in one process. Each node
//! talks to the mesh through its own [`LocalMeshTransport`]. Links are formed
//! between sessions, so a session that is disconnected or replaced takes its
//! links with it.
//!
//! Every node gets an unbounded inbox drained in order into the event channel
//! it attached, so the mesh never waits on a node's core loop.

use async_trait::async_trait;
use core::time::Duration;
use meshchat_core::{
    ConnectionState, InvitationReply, InvitationResponder, MeshError, MeshResult, MeshTransport,
    PeerIdentity, SendMode, ServiceType, SessionHandle, SessionId, TransportError, TransportEvent,
    TransportEventSender,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type NodeId = u64;

// ----------------------------------------------------------------------------
// Mesh State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct NodeState {
    identity: Option<PeerIdentity>,
    inbox: Option<mpsc::UnboundedSender<TransportEvent>>,
    advertising: Option<ServiceType>,
    browsing: Option<ServiceType>,
    out_of_range: bool,
}

impl NodeState {
    fn reachable(&self) -> bool {
        !self.out_of_range
    }
}

/// Unordered pair of linked sessions, stored low id first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Link(SessionId, SessionId);

impl Link {
    fn new(a: SessionId, b: SessionId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    fn involves(&self, session: SessionId) -> bool {
        self.0 == session || self.1 == session
    }

    fn other(&self, session: SessionId) -> SessionId {
        if self.0 == session {
            self.1
        } else {
            self.0
        }
    }
}

#[derive(Debug, Default)]
struct MeshState {
    next_node: NodeId,
    next_session: u64,
    nodes: HashMap<NodeId, NodeState>,
    /// Live sessions and the node that owns each
    sessions: HashMap<SessionId, NodeId>,
    links: BTreeSet<Link>,
}

impl MeshState {
    fn node_of(&self, peer: &PeerIdentity) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.identity.as_ref() == Some(peer))
            .map(|(id, _)| *id)
    }

    fn identity(&self, node: NodeId) -> Option<PeerIdentity> {
        self.nodes.get(&node).and_then(|n| n.identity.clone())
    }

    fn is_reachable(&self, node: NodeId) -> bool {
        self.nodes.get(&node).map_or(false, NodeState::reachable)
    }

    fn deliver(&self, node: NodeId, event: TransportEvent) {
        match self.nodes.get(&node).and_then(|n| n.inbox.as_ref()) {
            Some(inbox) => {
                // A closed inbox means the node's runtime has stopped
                let _ = inbox.send(event);
            }
            None => trace!(node, kind = event.kind(), "no event channel, dropping"),
        }
    }

    /// Link between `session` and any session owned by `node`
    fn link_between(&self, session: SessionId, node: NodeId) -> Option<Link> {
        self.links.iter().copied().find(|link| {
            link.involves(session) && self.sessions.get(&link.other(session)) == Some(&node)
        })
    }

    fn links_between_nodes(&self, a: NodeId, b: NodeId) -> Vec<Link> {
        self.links
            .iter()
            .copied()
            .filter(|link| {
                let ends = (self.sessions.get(&link.0), self.sessions.get(&link.1));
                ends == (Some(&a), Some(&b)) || ends == (Some(&b), Some(&a))
            })
            .collect()
    }

    fn links_of_node(&self, node: NodeId) -> Vec<Link> {
        self.links
            .iter()
            .copied()
            .filter(|link| {
                self.sessions.get(&link.0) == Some(&node) || self.sessions.get(&link.1) == Some(&node)
            })
            .collect()
    }

    /// Remove `link` and report NotConnected on both ends
    fn drop_link(&mut self, link: Link) {
        if !self.links.remove(&link) {
            return;
        }
        for (session, other) in [(link.0, link.1), (link.1, link.0)] {
            let owner = self.sessions.get(&session).copied();
            let remote = self.sessions.get(&other).and_then(|n| self.identity(*n));
            if let (Some(owner), Some(peer)) = (owner, remote) {
                self.deliver(
                    owner,
                    TransportEvent::ConnectionStateChanged {
                        session,
                        peer,
                        state: ConnectionState::NotConnected,
                    },
                );
            }
        }
    }

    /// PeerFound/PeerLost between `node` and every compatible node in range
    fn announce_visibility(&self, node: NodeId, visible: bool) {
        let Some(me) = self.nodes.get(&node) else {
            return;
        };
        for (other_id, other) in &self.nodes {
            if *other_id == node || !other.reachable() {
                continue;
            }
            // They see us
            if let (Some(service), Some(identity)) = (&me.advertising, &me.identity) {
                if other.browsing.as_ref() == Some(service) {
                    self.deliver(*other_id, visibility_event(identity.clone(), visible));
                }
            }
            // We see them
            if let (Some(service), Some(identity)) = (&other.advertising, &other.identity) {
                if me.browsing.as_ref() == Some(service) {
                    self.deliver(node, visibility_event(identity.clone(), visible));
                }
            }
        }
    }
}

fn visibility_event(peer: PeerIdentity, visible: bool) -> TransportEvent {
    if visible {
        TransportEvent::PeerFound { peer }
    } else {
        TransportEvent::PeerLost { peer }
    }
}

// ----------------------------------------------------------------------------
// Local Mesh
// ----------------------------------------------------------------------------

/// Shared medium connecting every [`LocalMeshTransport`] created from it
#[derive(Debug, Clone, Default)]
pub struct LocalMesh {
    state: Arc<Mutex<MeshState>>,
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join a new node to the mesh
    pub fn transport(&self) -> LocalMeshTransport {
        let mut state = self.lock();
        state.next_node += 1;
        let node = state.next_node;
        state.nodes.insert(node, NodeState::default());
        LocalMeshTransport {
            mesh: self.clone(),
            node,
        }
    }

    /// Number of live links
    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    /// Whether a link currently joins `a` and `b`
    pub fn are_linked(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        let state = self.lock();
        match (state.node_of(a), state.node_of(b)) {
            (Some(a_node), Some(b_node)) => !state.links_between_nodes(a_node, b_node).is_empty(),
            _ => false,
        }
    }

    /// Break every link between `a` and `b` while both stay in range
    pub fn sever(&self, a: &PeerIdentity, b: &PeerIdentity) {
        let mut state = self.lock();
        if let (Some(a_node), Some(b_node)) = (state.node_of(a), state.node_of(b)) {
            for link in state.links_between_nodes(a_node, b_node) {
                state.drop_link(link);
            }
            debug!(%a, %b, "severed links");
        }
    }

    /// Move a node out of, or back into, radio range
    pub fn set_in_range(&self, peer: &PeerIdentity, in_range: bool) {
        let mut state = self.lock();
        let Some(node) = state.node_of(peer) else {
            return;
        };
        if in_range {
            if let Some(n) = state.nodes.get_mut(&node) {
                n.out_of_range = false;
            }
            state.announce_visibility(node, true);
        } else {
            for link in state.links_of_node(node) {
                state.drop_link(link);
            }
            state.announce_visibility(node, false);
            if let Some(n) = state.nodes.get_mut(&node) {
                n.out_of_range = true;
            }
        }
        debug!(%peer, in_range, "range changed");
    }

    /// Deliver raw bytes from `from` to `to` over their existing link
    pub fn inject_payload(
        &self,
        from: &PeerIdentity,
        to: &PeerIdentity,
        payload: Vec<u8>,
    ) -> MeshResult<()> {
        let state = self.lock();
        let from_node = state.node_of(from).ok_or_else(|| MeshError::peer_not_found(from))?;
        let to_node = state.node_of(to).ok_or_else(|| MeshError::peer_not_found(to))?;
        let link = state
            .links_between_nodes(from_node, to_node)
            .into_iter()
            .next()
            .ok_or_else(|| MeshError::peer_not_found(to))?;
        let session = if state.sessions.get(&link.0) == Some(&to_node) {
            link.0
        } else {
            link.1
        };
        state.deliver(
            to_node,
            TransportEvent::DataReceived {
                session,
                from: from.clone(),
                payload,
            },
        );
        Ok(())
    }

    /// Wait for the invitee's answer and form the link, off the caller's task
    async fn settle_invitation(
        self,
        inviter: NodeId,
        session: SessionId,
        invitee: PeerIdentity,
        reply: oneshot::Receiver<InvitationReply>,
        timeout: Duration,
    ) {
        let accepted = match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(InvitationReply::Accept(remote))) => Some(remote),
            Ok(Ok(InvitationReply::Decline)) | Ok(Err(_)) => None,
            Err(_) => {
                debug!(%invitee, %session, "invitation timed out");
                None
            }
        };

        let mut state = self.lock();
        let invitee_node = state.node_of(&invitee);
        let linked = match (accepted, invitee_node, state.identity(inviter)) {
            (Some(remote), Some(invitee_node), Some(inviter_identity))
                if state.sessions.get(&session) == Some(&inviter)
                    && state.sessions.get(&remote.id()) == Some(&invitee_node)
                    && state.is_reachable(inviter)
                    && state.is_reachable(invitee_node) =>
            {
                state.links.insert(Link::new(session, remote.id()));
                state.deliver(
                    invitee_node,
                    TransportEvent::ConnectionStateChanged {
                        session: remote.id(),
                        peer: inviter_identity,
                        state: ConnectionState::Connected,
                    },
                );
                true
            }
            _ => false,
        };

        let outcome = if linked {
            ConnectionState::Connected
        } else {
            ConnectionState::NotConnected
        };
        state.deliver(
            inviter,
            TransportEvent::ConnectionStateChanged {
                session,
                peer: invitee,
                state: outcome,
            },
        );
    }
}

// ----------------------------------------------------------------------------
// Local Mesh Transport
// ----------------------------------------------------------------------------

/// One node's view of a [`LocalMesh`]
#[derive(Debug)]
pub struct LocalMeshTransport {
    mesh: LocalMesh,
    node: NodeId,
}

impl LocalMeshTransport {
    fn set_identity(&self, state: &mut MeshState, local: &PeerIdentity) {
        if let Some(node) = state.nodes.get_mut(&self.node) {
            node.identity = Some(local.clone());
        }
    }

    fn node_identity(&self, state: &MeshState) -> MeshResult<PeerIdentity> {
        state
            .identity(self.node)
            .ok_or_else(|| MeshError::config_error("mesh node has no identity yet"))
    }
}

#[async_trait]
impl MeshTransport for LocalMeshTransport {
    /// Must be called from within a Tokio runtime
    fn attach_events(&mut self, events: TransportEventSender) {
        let (inbox, mut queued) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = queued.recv().await {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        if let Some(node) = self.mesh.lock().nodes.get_mut(&self.node) {
            node.inbox = Some(inbox);
        }
    }

    async fn start_advertising(&self, local: &PeerIdentity, service: &ServiceType) -> MeshResult<()> {
        let mut state = self.mesh.lock();
        self.set_identity(&mut state, local);
        if let Some(node) = state.nodes.get_mut(&self.node) {
            node.advertising = Some(service.clone());
        }
        if state.is_reachable(self.node) {
            state.announce_visibility(self.node, true);
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> MeshResult<()> {
        let mut state = self.mesh.lock();
        let advertised = state
            .nodes
            .get(&self.node)
            .and_then(|n| n.advertising.clone().zip(n.identity.clone()));
        if let Some((service, identity)) = advertised {
            for (other_id, other) in &state.nodes {
                if *other_id != self.node && other.browsing.as_ref() == Some(&service) {
                    state.deliver(*other_id, visibility_event(identity.clone(), false));
                }
            }
        }
        if let Some(node) = state.nodes.get_mut(&self.node) {
            node.advertising = None;
        }
        Ok(())
    }

    async fn start_browsing(&self, local: &PeerIdentity, service: &ServiceType) -> MeshResult<()> {
        let mut state = self.mesh.lock();
        self.set_identity(&mut state, local);
        if let Some(node) = state.nodes.get_mut(&self.node) {
            node.browsing = Some(service.clone());
        }
        if !state.is_reachable(self.node) {
            return Ok(());
        }
        for (other_id, other) in &state.nodes {
            if *other_id == self.node || !other.reachable() {
                continue;
            }
            if let (Some(advertised), Some(identity)) = (&other.advertising, &other.identity) {
                if advertised == service {
                    state.deliver(self.node, visibility_event(identity.clone(), true));
                }
            }
        }
        Ok(())
    }

    async fn stop_browsing(&self) -> MeshResult<()> {
        if let Some(node) = self.mesh.lock().nodes.get_mut(&self.node) {
            node.browsing = None;
        }
        Ok(())
    }

    async fn create_session(&self, local: &PeerIdentity) -> MeshResult<SessionHandle> {
        let mut state = self.mesh.lock();
        self.set_identity(&mut state, local);
        state.next_session += 1;
        let session = SessionId::new(state.next_session);
        state.sessions.insert(session, self.node);
        debug!(node = self.node, %session, "session created");
        Ok(SessionHandle::new(session, local.clone()))
    }

    async fn disconnect(&self, session: &SessionHandle) -> MeshResult<()> {
        let mut state = self.mesh.lock();
        let doomed: Vec<Link> = state
            .links
            .iter()
            .copied()
            .filter(|link| link.involves(session.id()))
            .collect();
        for link in doomed {
            state.drop_link(link);
        }
        state.sessions.remove(&session.id());
        debug!(node = self.node, session = %session.id(), "session disconnected");
        Ok(())
    }

    async fn invite(
        &self,
        peer: &PeerIdentity,
        session: &SessionHandle,
        timeout: Duration,
    ) -> MeshResult<()> {
        let reply = {
            let state = self.mesh.lock();
            if state.sessions.get(&session.id()) != Some(&self.node) {
                return Err(TransportError::SessionClosed {
                    session: session.id().as_u64(),
                }
                .into());
            }
            let inviter = self.node_identity(&state)?;
            let target = state
                .node_of(peer)
                .filter(|target| {
                    state.is_reachable(self.node)
                        && state.is_reachable(*target)
                        && state
                            .nodes
                            .get(target)
                            .map_or(false, |n| n.advertising.is_some())
                })
                .ok_or_else(|| MeshError::peer_not_found(peer))?;

            let (responder, reply) = InvitationResponder::new();
            state.deliver(
                self.node,
                TransportEvent::ConnectionStateChanged {
                    session: session.id(),
                    peer: peer.clone(),
                    state: ConnectionState::Connecting,
                },
            );
            state.deliver(
                target,
                TransportEvent::InvitationReceived {
                    peer: inviter,
                    responder,
                },
            );
            reply
        };

        tokio::spawn(self.mesh.clone().settle_invitation(
            self.node,
            session.id(),
            peer.clone(),
            reply,
            timeout,
        ));
        Ok(())
    }

    async fn send(
        &self,
        session: &SessionHandle,
        payload: &[u8],
        to: &[PeerIdentity],
        _mode: SendMode,
    ) -> MeshResult<()> {
        let state = self.mesh.lock();
        let from = self.node_identity(&state)?;

        // Validate every recipient before delivering to any
        let mut routes = Vec::with_capacity(to.len());
        for peer in to {
            let target = state.node_of(peer).ok_or_else(|| MeshError::peer_not_found(peer))?;
            let link = state.link_between(session.id(), target).ok_or_else(|| {
                TransportError::SendRejected {
                    reason: format!("no link from {} to {peer}", session.id()),
                }
            })?;
            routes.push((target, link.other(session.id())));
        }
        for (target, remote_session) in routes {
            state.deliver(
                target,
                TransportEvent::DataReceived {
                    session: remote_session,
                    from: from.clone(),
                    payload: payload.to_vec(),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_core::{create_event_channel, ChannelConfig, TransportEventReceiver};

    struct Node {
        identity: PeerIdentity,
        transport: LocalMeshTransport,
        events: TransportEventReceiver,
    }

    fn node(mesh: &LocalMesh, name: &str) -> Node {
        let mut transport = mesh.transport();
        let (sender, events) = create_event_channel(&ChannelConfig::testing());
        transport.attach_events(sender);
        Node {
            identity: PeerIdentity::new(name),
            transport,
            events,
        }
    }

    async fn next(events: &mut TransportEventReceiver) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within a second")
            .expect("channel open")
    }

    #[tokio::test]
    async fn browser_finds_existing_advertiser() {
        let mesh = LocalMesh::new();
        let service = ServiceType::default();
        let alice = node(&mesh, "alice");
        let mut bob = node(&mesh, "bob");

        alice.transport.start_advertising(&alice.identity, &service).await.unwrap();
        bob.transport.start_browsing(&bob.identity, &service).await.unwrap();

        match next(&mut bob.events).await {
            TransportEvent::PeerFound { peer } => assert_eq!(peer, alice.identity),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn different_service_types_do_not_see_each_other() {
        let mesh = LocalMesh::new();
        let alice = node(&mesh, "alice");
        let mut bob = node(&mesh, "bob");

        let chat = ServiceType::new("chat").unwrap();
        let other = ServiceType::new("other").unwrap();
        alice.transport.start_advertising(&alice.identity, &chat).await.unwrap();
        bob.transport.start_browsing(&bob.identity, &other).await.unwrap();

        let quiet = tokio::time::timeout(Duration::from_millis(50), bob.events.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn accepted_invitation_links_sessions_and_carries_data() {
        let mesh = LocalMesh::new();
        let service = ServiceType::default();
        let mut alice = node(&mesh, "alice");
        let mut bob = node(&mesh, "bob");

        bob.transport.start_advertising(&bob.identity, &service).await.unwrap();
        let alice_session = alice.transport.create_session(&alice.identity).await.unwrap();
        let bob_session = bob.transport.create_session(&bob.identity).await.unwrap();

        alice
            .transport
            .invite(&bob.identity, &alice_session, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(matches!(
            next(&mut alice.events).await,
            TransportEvent::ConnectionStateChanged { state: ConnectionState::Connecting, .. }
        ));
        match next(&mut bob.events).await {
            TransportEvent::InvitationReceived { peer, responder } => {
                assert_eq!(peer, alice.identity);
                assert!(responder.accept(&bob_session));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            next(&mut alice.events).await,
            TransportEvent::ConnectionStateChanged { state: ConnectionState::Connected, .. }
        ));
        assert!(mesh.are_linked(&alice.identity, &bob.identity));

        alice
            .transport
            .send(&alice_session, b"hello", &[bob.identity.clone()], SendMode::Reliable)
            .await
            .unwrap();
        assert!(matches!(
            next(&mut bob.events).await,
            TransportEvent::ConnectionStateChanged { state: ConnectionState::Connected, .. }
        ));
        match next(&mut bob.events).await {
            TransportEvent::DataReceived { session, from, payload } => {
                assert_eq!(session, bob_session.id());
                assert_eq!(from, alice.identity);
                assert_eq!(payload, b"hello");
            }
            other => panic!("unexpected event {other:?}"),
        }

        mesh.sever(&alice.identity, &bob.identity);
        assert_eq!(mesh.link_count(), 0);
        assert!(matches!(
            next(&mut alice.events).await,
            TransportEvent::ConnectionStateChanged { state: ConnectionState::NotConnected, .. }
        ));
    }

    #[tokio::test]
    async fn invitation_to_absent_peer_fails_fast() {
        let mesh = LocalMesh::new();
        let alice = node(&mesh, "alice");
        let session = alice.transport.create_session(&alice.identity).await.unwrap();

        let stranger = PeerIdentity::new("stranger");
        let result = alice
            .transport
            .invite(&stranger, &session, Duration::from_secs(1))
            .await;
        assert!(matches!(
            result,
            Err(MeshError::Transport(TransportError::PeerNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn unanswered_invitation_times_out() {
        let mesh = LocalMesh::new();
        let service = ServiceType::default();
        let mut alice = node(&mesh, "alice");
        let mut bob = node(&mesh, "bob");

        bob.transport.start_advertising(&bob.identity, &service).await.unwrap();
        let session = alice.transport.create_session(&alice.identity).await.unwrap();
        alice
            .transport
            .invite(&bob.identity, &session, Duration::from_millis(20))
            .await
            .unwrap();

        // Hold the responder without answering
        let _pending = next(&mut bob.events).await;
        let _connecting = next(&mut alice.events).await;
        assert!(matches!(
            next(&mut alice.events).await,
            TransportEvent::ConnectionStateChanged { state: ConnectionState::NotConnected, .. }
        ));
        assert_eq!(mesh.link_count(), 0);
    }

    #[tokio::test]
    async fn send_without_link_is_rejected() {
        let mesh = LocalMesh::new();
        let alice = node(&mesh, "alice");
        let bob = node(&mesh, "bob");
        let session = alice.transport.create_session(&alice.identity).await.unwrap();
        bob.transport.create_session(&bob.identity).await.unwrap();

        let result = alice
            .transport
            .send(&session, b"hi", &[bob.identity.clone()], SendMode::Reliable)
            .await;
        assert!(matches!(
            result,
            Err(MeshError::Transport(TransportError::SendRejected { .. }))
        ));
    }
}
