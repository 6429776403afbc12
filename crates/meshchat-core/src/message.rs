//! Chat messages and the append-only message log

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{PeerIdentity, Timestamp};

/// Label used for messages authored on this device
pub const SELF_LABEL: &str = "self";

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// Unique message identifier, fresh per construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    Local,
    Remote { display_name: String },
}

impl Sender {
    pub fn remote(peer: &PeerIdentity) -> Self {
        Sender::Remote {
            display_name: peer.display_name().to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Sender::Local)
    }

    /// `"self"` for local messages, otherwise the peer's display name
    pub fn label(&self) -> &str {
        match self {
            Sender::Local => SELF_LABEL,
            Sender::Remote { display_name } => display_name,
        }
    }
}

/// An immutable chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub sender_label: String,
}

impl Message {
    pub fn new<B: Into<String>>(body: B, sender: &Sender) -> Self {
        Self {
            id: MessageId::generate(),
            body: body.into(),
            sender_label: sender.label().to_string(),
        }
    }
}

/// One line of the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub message: Message,
    pub sender: Sender,
    /// Local time the entry was appended
    pub timestamp: Timestamp,
}

impl fmt::Display for MessageLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender.label(), self.message.body)
    }
}

// ----------------------------------------------------------------------------
// Message Log
// ----------------------------------------------------------------------------

/// Append-only ordered log with snapshot reads
///
/// Entries live behind an `Arc`; `snapshot()` hands out the current vector
/// and later appends copy on write, so a snapshot never changes.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Arc<Vec<MessageLogEntry>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: MessageLogEntry) -> &MessageLogEntry {
        let entries = Arc::make_mut(&mut self.entries);
        entries.push(entry);
        &entries[entries.len() - 1]
    }

    pub fn snapshot(&self) -> Arc<Vec<MessageLogEntry>> {
        Arc::clone(&self.entries)
    }

    pub fn entries(&self) -> &[MessageLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Payload Codec
// ----------------------------------------------------------------------------

/// Encode a text body as a transport payload
pub fn encode_text(body: &str) -> Vec<u8> {
    body.as_bytes().to_vec()
}

/// Decode a payload as UTF-8 text; `None` for anything else
pub fn decode_text(payload: &[u8]) -> Option<String> {
    core::str::from_utf8(payload).ok().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str, sender: Sender) -> MessageLogEntry {
        MessageLogEntry {
            message: Message::new(body, &sender),
            sender,
            timestamp: Timestamp::new(0),
        }
    }

    #[test]
    fn snapshots_are_unaffected_by_later_appends() {
        let mut log = MessageLog::new();
        log.append(entry("one", Sender::Local));
        let before = log.snapshot();

        log.append(entry("two", Sender::Local));
        assert_eq!(before.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::new("same", &Sender::Local);
        let b = Message::new("same", &Sender::Local);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn sender_labels() {
        let peer = PeerIdentity::new("Galaxy");
        assert_eq!(Sender::Local.label(), "self");
        assert_eq!(Sender::remote(&peer).label(), "Galaxy");
        assert_eq!(entry("hi", Sender::remote(&peer)).to_string(), "Galaxy: hi");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_eq!(decode_text(&encode_text("привет")).as_deref(), Some("привет"));
        assert_eq!(decode_text(&[0xff, 0xfe, 0x00]), None);
    }
}
