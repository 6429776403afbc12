//! Session Controller
//!
//! Owns the current session handle, the peer registry and the message
//! exchange. Drives advertising and browsing, answers invitations, invites
//! discovered peers and re-invites peers that drop. Every method runs on the
//! core loop task, so none of the state here is shared.

use meshchat_core::{
    ChatSnapshot, ConnectionState, DiscoveryStatus, InvitationResponder, MeshConfig, MeshResult,
    MeshTransport, PeerIdentity, PeerRegistry, RegistryChange, SendOutcome, SessionError,
    SessionHandle, SessionId, TimeSource, TransportEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::exchange::MessageExchange;

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters for the session controller
#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    pub events_processed: u64,
    pub stale_events_dropped: u64,
    pub invitations_sent: u64,
    pub invitations_accepted: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub resets: u64,
}

// ----------------------------------------------------------------------------
// Session Controller
// ----------------------------------------------------------------------------

pub struct SessionController {
    local: PeerIdentity,
    config: MeshConfig,
    transport: Arc<dyn MeshTransport>,
    session: SessionHandle,
    registry: PeerRegistry,
    exchange: MessageExchange,
    discovery: DiscoveryStatus,
    stats: ControllerStats,
    /// Bumped on every observable state change
    revision: u64,
    closed: bool,
}

impl SessionController {
    /// Create the controller and its first session
    pub async fn new(
        local: PeerIdentity,
        config: MeshConfig,
        transport: Arc<dyn MeshTransport>,
        time_source: Arc<dyn TimeSource>,
    ) -> MeshResult<Self> {
        let session = transport.create_session(&local).await?;
        info!(local = %local, session = %session.id(), "session created");
        let exchange = MessageExchange::new(time_source, config.max_message_bytes);

        Ok(Self {
            local,
            config,
            transport,
            session,
            registry: PeerRegistry::new(),
            exchange,
            discovery: DiscoveryStatus::default(),
            stats: ControllerStats::default(),
            revision: 0,
            closed: false,
        })
    }

    /// Start advertising and browsing; failures are logged and not retried
    pub async fn start(&mut self) {
        let service = self.config.service_type.clone();

        match self.transport.start_advertising(&self.local, &service).await {
            Ok(()) => {
                info!(service = %service, "advertising started");
                self.discovery.advertising = true;
            }
            Err(e) => warn!(error = %e, service = %service, "advertising failed to start"),
        }

        match self.transport.start_browsing(&self.local, &service).await {
            Ok(()) => {
                info!(service = %service, "browsing started");
                self.discovery.browsing = true;
            }
            Err(e) => warn!(error = %e, service = %service, "browsing failed to start"),
        }

        self.touch();
    }

    /// Replace the current session with a fresh one for the same identity
    pub async fn reset(&mut self) -> MeshResult<SessionId> {
        if self.closed {
            return Err(SessionError::InvalidState {
                reason: "controller is shut down".to_string(),
            }
            .into());
        }

        let previous = self.session.id();
        if let Err(e) = self.transport.disconnect(&self.session).await {
            warn!(error = %e, session = %previous, "disconnect failed during reset");
        }
        // Forget the old roster even if a fresh session cannot be created
        self.registry.clear();
        self.touch();

        self.session = self.transport.create_session(&self.local).await?;
        self.stats.resets += 1;
        info!(previous = %previous, session = %self.session.id(), "session reset");
        Ok(self.session.id())
    }

    /// Stop discovery and drop the current session
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.transport.stop_advertising().await {
            warn!(error = %e, "failed to stop advertising");
        }
        if let Err(e) = self.transport.stop_browsing().await {
            warn!(error = %e, "failed to stop browsing");
        }
        if let Err(e) = self.transport.disconnect(&self.session).await {
            warn!(error = %e, session = %self.session.id(), "failed to disconnect");
        }
        self.discovery = DiscoveryStatus::default();
        self.registry.clear();
        self.closed = true;
        self.touch();
        info!(local = %self.local, "session controller shut down");
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    /// Route one transport event; events for a replaced session are rejected
    pub async fn handle_event(&mut self, event: TransportEvent) -> MeshResult<()> {
        self.stats.events_processed += 1;

        if let Some(session) = event.session() {
            if session != self.session.id() {
                self.stats.stale_events_dropped += 1;
                return Err(SessionError::StaleSession {
                    stale: session.as_u64(),
                    current: self.session.id().as_u64(),
                }
                .into());
            }
        }

        match event {
            TransportEvent::PeerFound { peer } => self.on_peer_discovered(peer).await,
            TransportEvent::PeerLost { peer } => self.on_peer_lost(&peer),
            TransportEvent::ConnectionStateChanged { peer, state, .. } => {
                self.on_connection_state_changed(peer, state).await
            }
            TransportEvent::DataReceived { from, payload, .. } => {
                self.on_data_received(&from, &payload)
            }
            TransportEvent::InvitationReceived { peer, responder } => {
                self.on_incoming_invitation(&peer, responder)
            }
            TransportEvent::AdvertisingFailed { reason } => {
                warn!(reason = %reason, "advertising failed");
                self.discovery.advertising = false;
                self.touch();
            }
            TransportEvent::BrowsingFailed { reason } => {
                warn!(reason = %reason, "browsing failed");
                self.discovery.browsing = false;
                self.touch();
            }
        }
        Ok(())
    }

    /// Invite a newly visible peer unless it is us or already tracked
    pub async fn on_peer_discovered(&mut self, peer: PeerIdentity) {
        if peer == self.local {
            return;
        }
        if self.registry.is_tracked(&peer) {
            debug!(peer = %peer, "peer already connected or invited");
            return;
        }
        info!(peer = %peer, "peer discovered");
        self.invite(&peer).await;
    }

    pub fn on_peer_lost(&mut self, peer: &PeerIdentity) {
        info!(peer = %peer, "peer lost");
    }

    /// Accept every invitation into the current session
    pub fn on_incoming_invitation(&mut self, peer: &PeerIdentity, responder: InvitationResponder) {
        if responder.accept(&self.session) {
            self.stats.invitations_accepted += 1;
            info!(peer = %peer, session = %self.session.id(), "accepted invitation");
        } else {
            debug!(peer = %peer, "inviter stopped waiting before we accepted");
        }
    }

    pub async fn on_connection_state_changed(&mut self, peer: PeerIdentity, state: ConnectionState) {
        let change = self.registry.apply(&peer, state);
        if change != RegistryChange::Unchanged {
            self.touch();
        }

        match state {
            ConnectionState::Connecting => debug!(peer = %peer, "connecting"),
            ConnectionState::Connected => match change {
                RegistryChange::Added => info!(
                    peer = %peer,
                    connected = self.registry.len(),
                    "peer connected"
                ),
                _ => debug!(peer = %peer, "duplicate connected event"),
            },
            ConnectionState::NotConnected => {
                if change == RegistryChange::Removed {
                    info!(peer = %peer, connected = self.registry.len(), "peer disconnected");
                }
                if peer != self.local {
                    self.invite(&peer).await;
                }
            }
        }
    }

    pub fn on_data_received(&mut self, from: &PeerIdentity, payload: &[u8]) {
        if let Some(entry) = self.exchange.receive(from, payload) {
            debug!(peer = %from, id = %entry.message.id, "message received");
            self.stats.messages_received += 1;
            self.touch();
        }
    }

    async fn invite(&mut self, peer: &PeerIdentity) {
        if self.closed {
            return;
        }
        self.registry.mark_pending(peer);
        let timeout = self.config.invitation_timeout();

        match self.transport.invite(peer, &self.session, timeout).await {
            Ok(()) => {
                self.stats.invitations_sent += 1;
                debug!(
                    peer = %peer,
                    session = %self.session.id(),
                    timeout_secs = timeout.as_secs(),
                    "invitation sent"
                );
            }
            Err(e) => {
                // Peer out of reach: stop trying until it is discovered again
                self.registry.clear_pending(peer);
                debug!(peer = %peer, error = %e, "invitation not delivered");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Broadcast `body` to every connected peer over the current session
    pub async fn send_text(&mut self, body: &str) -> SendOutcome {
        let outcome = self
            .exchange
            .send_text(
                self.transport.as_ref(),
                &self.session,
                self.registry.peers(),
                body,
            )
            .await;
        if let SendOutcome::Delivered { .. } = outcome {
            self.stats.messages_sent += 1;
            self.touch();
        }
        outcome
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn exchange(&self) -> &MessageExchange {
        &self.exchange
    }

    pub fn discovery(&self) -> DiscoveryStatus {
        self.discovery
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Immutable view of the current state tagged with `version`
    pub fn snapshot(&self, version: u64) -> ChatSnapshot {
        ChatSnapshot {
            version,
            local: self.local.clone(),
            session: (!self.closed).then(|| self.session.id()),
            connected_peers: self.registry.peers().to_vec(),
            messages: self.exchange.log().snapshot(),
            discovery: self.discovery,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
