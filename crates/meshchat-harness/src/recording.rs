//! Recording transport
//!
//! A [`MeshTransport`] that performs no networking. Every call is appended to
//! a shared log so tests can assert exactly what the core asked the transport
//! to do, and individual operations can be made to fail on demand.

use async_trait::async_trait;
use core::time::Duration;
use meshchat_core::{
    MeshError, MeshResult, MeshTransport, PeerIdentity, SendMode, ServiceType, SessionHandle,
    SessionId, TransportError, TransportEvent, TransportEventSender,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// One call made by the core into the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartAdvertising { service: ServiceType },
    StopAdvertising,
    StartBrowsing { service: ServiceType },
    StopBrowsing,
    CreateSession { session: SessionId },
    Disconnect { session: SessionId },
    Invite {
        peer: PeerIdentity,
        session: SessionId,
        timeout: Duration,
    },
    Send {
        session: SessionId,
        payload: Vec<u8>,
        to: Vec<PeerIdentity>,
        mode: SendMode,
    },
}

/// Operations that can be switched to fail
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub advertising: bool,
    pub browsing: bool,
    pub send: bool,
    /// Peers whose invitations are rejected as unreachable
    pub unreachable: HashSet<PeerIdentity>,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Vec<TransportCall>,
    failures: FailurePlan,
    next_session: u64,
    events: Option<TransportEventSender>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Recording Transport
// ----------------------------------------------------------------------------

/// Transport that records calls instead of touching a network
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingTransport {
    /// Create the transport and a handle that observes the same state
    pub fn new() -> (Self, RecordingHandle) {
        let transport = Self::default();
        let handle = RecordingHandle {
            shared: Arc::clone(&transport.shared),
        };
        (transport, handle)
    }

    fn record(&self, call: TransportCall) {
        lock(&self.shared).calls.push(call);
    }
}

#[async_trait]
impl MeshTransport for RecordingTransport {
    fn attach_events(&mut self, events: TransportEventSender) {
        lock(&self.shared).events = Some(events);
    }

    async fn start_advertising(&self, _local: &PeerIdentity, service: &ServiceType) -> MeshResult<()> {
        self.record(TransportCall::StartAdvertising {
            service: service.clone(),
        });
        if lock(&self.shared).failures.advertising {
            return Err(TransportError::StartFailed {
                operation: "advertising".to_string(),
                reason: "radio unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> MeshResult<()> {
        self.record(TransportCall::StopAdvertising);
        Ok(())
    }

    async fn start_browsing(&self, _local: &PeerIdentity, service: &ServiceType) -> MeshResult<()> {
        self.record(TransportCall::StartBrowsing {
            service: service.clone(),
        });
        if lock(&self.shared).failures.browsing {
            return Err(TransportError::StartFailed {
                operation: "browsing".to_string(),
                reason: "radio unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn stop_browsing(&self) -> MeshResult<()> {
        self.record(TransportCall::StopBrowsing);
        Ok(())
    }

    async fn create_session(&self, local: &PeerIdentity) -> MeshResult<SessionHandle> {
        let mut shared = lock(&self.shared);
        shared.next_session += 1;
        let session = SessionId::new(shared.next_session);
        shared.calls.push(TransportCall::CreateSession { session });
        Ok(SessionHandle::new(session, local.clone()))
    }

    async fn disconnect(&self, session: &SessionHandle) -> MeshResult<()> {
        self.record(TransportCall::Disconnect {
            session: session.id(),
        });
        Ok(())
    }

    async fn invite(
        &self,
        peer: &PeerIdentity,
        session: &SessionHandle,
        timeout: Duration,
    ) -> MeshResult<()> {
        self.record(TransportCall::Invite {
            peer: peer.clone(),
            session: session.id(),
            timeout,
        });
        if lock(&self.shared).failures.unreachable.contains(peer) {
            return Err(MeshError::peer_not_found(peer));
        }
        Ok(())
    }

    async fn send(
        &self,
        session: &SessionHandle,
        payload: &[u8],
        to: &[PeerIdentity],
        mode: SendMode,
    ) -> MeshResult<()> {
        self.record(TransportCall::Send {
            session: session.id(),
            payload: payload.to_vec(),
            to: to.to_vec(),
            mode,
        });
        if lock(&self.shared).failures.send {
            return Err(TransportError::SendRejected {
                reason: "link dropped".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Recording Handle
// ----------------------------------------------------------------------------

/// Test-side view of a [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct RecordingHandle {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingHandle {
    /// All calls so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.shared).calls.clone()
    }

    /// Invitations issued to `peer`
    pub fn invites_to(&self, peer: &PeerIdentity) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::Invite { peer: p, .. } if p == peer))
            .collect()
    }

    /// Payloads handed to `send`
    pub fn sends(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, TransportCall::Send { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    pub fn set_failures(&self, failures: FailurePlan) {
        lock(&self.shared).failures = failures;
    }

    pub fn update_failures<F: FnOnce(&mut FailurePlan)>(&self, update: F) {
        update(&mut lock(&self.shared).failures);
    }

    /// Push an event as if the transport had produced it
    pub async fn emit(&self, event: TransportEvent) -> MeshResult<()> {
        let sender = lock(&self.shared)
            .events
            .clone()
            .ok_or_else(|| MeshError::channel_error("no event channel attached"))?;
        sender
            .send(event)
            .await
            .map_err(|_| MeshError::channel_error("event receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let (transport, handle) = RecordingTransport::new();
        let local = PeerIdentity::new("alice");
        let session = transport.create_session(&local).await.unwrap();
        transport
            .send(&session, b"hi", &[], SendMode::Reliable)
            .await
            .unwrap();

        let calls = handle.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], TransportCall::CreateSession { session: session.id() });
        assert_eq!(handle.sends().len(), 1);
    }

    #[tokio::test]
    async fn sessions_get_fresh_ids() {
        let (transport, _handle) = RecordingTransport::new();
        let local = PeerIdentity::new("alice");
        let first = transport.create_session(&local).await.unwrap();
        let second = transport.create_session(&local).await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn unreachable_peer_invitation_fails() {
        let (transport, handle) = RecordingTransport::new();
        let local = PeerIdentity::new("alice");
        let bob = PeerIdentity::new("bob");
        handle.update_failures(|plan| {
            plan.unreachable.insert(bob.clone());
        });

        let session = transport.create_session(&local).await.unwrap();
        let result = transport.invite(&bob, &session, Duration::from_secs(10)).await;
        assert!(matches!(
            result,
            Err(MeshError::Transport(TransportError::PeerNotFound { .. }))
        ));
        assert_eq!(handle.invites_to(&bob).len(), 1);
    }
}
