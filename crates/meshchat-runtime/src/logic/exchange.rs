//! Message Exchange
//!
//! Turns outgoing text into transport payloads and incoming payloads into
//! log entries. Owns the message log; the session controller decides who the
//! recipients are and which session carries the payload.

use meshchat_core::{
    decode_text, encode_text, Message, MessageLog, MessageLogEntry, MeshTransport, PeerIdentity,
    SendMode, SendOutcome, Sender, SessionHandle, TimeSource,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MessageExchange {
    log: MessageLog,
    time_source: Arc<dyn TimeSource>,
    max_message_bytes: usize,
}

impl MessageExchange {
    pub fn new(time_source: Arc<dyn TimeSource>, max_message_bytes: usize) -> Self {
        Self {
            log: MessageLog::new(),
            time_source,
            max_message_bytes,
        }
    }

    /// Broadcast `body` to `peers` over `session` in one reliable send
    ///
    /// The body is logged as a local message only after the transport has
    /// accepted it. Nothing here is an error to the caller: an empty roster,
    /// an oversized body and a transport failure each map to a [`SendOutcome`].
    pub async fn send_text(
        &mut self,
        transport: &dyn MeshTransport,
        session: &SessionHandle,
        peers: &[PeerIdentity],
        body: &str,
    ) -> SendOutcome {
        if peers.is_empty() {
            debug!("no connected peers, message not sent");
            return SendOutcome::NoPeers;
        }
        if body.len() > self.max_message_bytes {
            warn!(
                size = body.len(),
                limit = self.max_message_bytes,
                "message too large, not sent"
            );
            return SendOutcome::Failed;
        }

        let payload = encode_text(body);
        match transport
            .send(session, &payload, peers, SendMode::Reliable)
            .await
        {
            Ok(()) => {
                self.append(body.to_string(), Sender::Local);
                SendOutcome::Delivered {
                    recipients: peers.len(),
                }
            }
            Err(e) => {
                warn!(error = %e, session = %session.id(), "send failed");
                SendOutcome::Failed
            }
        }
    }

    /// Log a payload received from `from`; undecodable payloads are dropped
    pub fn receive(&mut self, from: &PeerIdentity, payload: &[u8]) -> Option<&MessageLogEntry> {
        let Some(text) = decode_text(payload) else {
            debug!(peer = %from, size = payload.len(), "dropping payload that is not UTF-8 text");
            return None;
        };
        Some(self.append(text, Sender::remote(from)))
    }

    fn append(&mut self, body: String, sender: Sender) -> &MessageLogEntry {
        let timestamp = self.time_source.now();
        let message = Message::new(body, &sender);
        self.log.append(MessageLogEntry {
            message,
            sender,
            timestamp,
        })
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_core::{SessionId, Timestamp, SELF_LABEL};
    use meshchat_harness::{FailurePlan, RecordingTransport, TransportCall};

    struct FixedTime(u64);

    impl TimeSource for FixedTime {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.0)
        }
    }

    fn exchange() -> MessageExchange {
        MessageExchange::new(Arc::new(FixedTime(1_700_000_000_000)), 16)
    }

    fn session() -> SessionHandle {
        SessionHandle::new(SessionId::new(1), PeerIdentity::new("me"))
    }

    #[tokio::test]
    async fn send_without_peers_is_a_no_op() {
        let (transport, handle) = RecordingTransport::new();
        let mut exchange = exchange();

        for body in ["", "hello"] {
            let outcome = exchange.send_text(&transport, &session(), &[], body).await;
            assert_eq!(outcome, SendOutcome::NoPeers);
        }
        assert!(exchange.log().is_empty());
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn send_to_one_peer_logs_once() {
        let (transport, handle) = RecordingTransport::new();
        let mut exchange = exchange();
        let bob = PeerIdentity::new("bob");

        let outcome = exchange
            .send_text(&transport, &session(), &[bob.clone()], "hello")
            .await;

        assert_eq!(outcome, SendOutcome::Delivered { recipients: 1 });
        assert_eq!(
            handle.sends(),
            vec![TransportCall::Send {
                session: SessionId::new(1),
                payload: b"hello".to_vec(),
                to: vec![bob],
                mode: SendMode::Reliable,
            }]
        );
        let entries = exchange.log().entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].sender.is_local());
        assert_eq!(entries[0].message.sender_label, SELF_LABEL);
        assert_eq!(entries[0].message.body, "hello");
        assert_eq!(entries[0].timestamp, Timestamp::new(1_700_000_000_000));
    }

    #[tokio::test]
    async fn transport_failure_is_absorbed() {
        let (transport, handle) = RecordingTransport::new();
        handle.set_failures(FailurePlan {
            send: true,
            ..FailurePlan::default()
        });
        let mut exchange = exchange();

        let outcome = exchange
            .send_text(&transport, &session(), &[PeerIdentity::new("bob")], "hello")
            .await;

        assert_eq!(outcome, SendOutcome::Failed);
        assert!(exchange.log().is_empty());
    }

    #[tokio::test]
    async fn oversized_body_never_reaches_transport() {
        let (transport, handle) = RecordingTransport::new();
        let mut exchange = exchange();

        let outcome = exchange
            .send_text(&transport, &session(), &[PeerIdentity::new("bob")], "seventeen bytes!!")
            .await;

        assert_eq!(outcome, SendOutcome::Failed);
        assert!(handle.sends().is_empty());
        assert!(exchange.log().is_empty());
    }

    #[test]
    fn receives_are_logged_in_arrival_order() {
        let mut exchange = exchange();
        let alice = PeerIdentity::new("alice");
        let bob = PeerIdentity::new("bob");

        exchange.receive(&alice, b"first");
        exchange.receive(&bob, b"second");

        let labels: Vec<_> = exchange
            .log()
            .entries()
            .iter()
            .map(|entry| (entry.sender.label().to_string(), entry.message.body.clone()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("alice".to_string(), "first".to_string()),
                ("bob".to_string(), "second".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let mut exchange = exchange();
        assert!(exchange.receive(&PeerIdentity::new("bob"), &[0xff, 0xfe, 0x00]).is_none());
        assert!(exchange.log().is_empty());
    }

    #[test]
    fn message_ids_are_fresh_for_identical_bodies() {
        let mut exchange = exchange();
        let bob = PeerIdentity::new("bob");
        let first = exchange.receive(&bob, b"same").map(|e| e.message.id);
        let second = exchange.receive(&bob, b"same").map(|e| e.message.id);
        assert_ne!(first, second);
    }
}
