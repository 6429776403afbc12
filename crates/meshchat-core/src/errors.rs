//! Error types for MeshChat
//!
//! Transport and session failures are modelled as specific enums and unified
//! under [`MeshError`]. None of these are fatal to the process: the core loop
//! logs them and keeps running, except for closed channels.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a [`MeshTransport`](crate::transport::MeshTransport)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Peer not reachable: {peer}")]
    PeerNotFound { peer: String },
    #[error("Session {session} is closed")]
    SessionClosed { session: u64 },
    #[error("Failed to start {operation}: {reason}")]
    StartFailed { operation: String, reason: String },
    #[error("Send rejected: {reason}")]
    SendRejected { reason: String },
}

/// Session lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Event for stale session {stale} (current {current})")]
    StaleSession { stale: u64, current: u64 },
    #[error("Session state invalid: {reason}")]
    InvalidState { reason: String },
}

// ----------------------------------------------------------------------------
// Umbrella Error
// ----------------------------------------------------------------------------

/// Core error type for MeshChat
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid service type {value:?}: {reason}")]
    InvalidServiceType { value: String, reason: String },

    /// Channel communication error between the core loop and its clients
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl MeshError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        MeshError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a peer-not-found transport error
    pub fn peer_not_found<P: ToString>(peer: P) -> Self {
        MeshError::Transport(TransportError::PeerNotFound {
            peer: peer.to_string(),
        })
    }

    /// Whether the core loop can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MeshError::Channel { .. })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MeshError>;
pub type MeshResult<T> = Result<T>;
