//! Core types for MeshChat
//!
//! Newtypes for peer identity, service naming, session tokens and time.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::errors::MeshError;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Stable identity of a device on the mesh
///
/// Two identities are equal only when their uniqueness tokens match; the
/// display name is presentation data and may be shared by several devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    display_name: String,
    token: Uuid,
}

impl PeerIdentity {
    /// Create a fresh identity with a random uniqueness token
    pub fn new<N: Into<String>>(display_name: N) -> Self {
        Self {
            display_name: display_name.into(),
            token: Uuid::new_v4(),
        }
    }

    /// Rebuild an identity from a known token
    pub fn with_token<N: Into<String>>(display_name: N, token: Uuid) -> Self {
        Self {
            display_name: display_name.into(),
            token,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token.simple().to_string();
        write!(f, "{}#{}", self.display_name, &token[..8])
    }
}

// ----------------------------------------------------------------------------
// Service Type
// ----------------------------------------------------------------------------

/// Service identifier shared by every instance of the application
///
/// Follows local-network service naming: 1-15 characters of lowercase ASCII
/// letters, digits and hyphens, with at least one letter and no leading,
/// trailing or doubled hyphen.
///
/// The default is `mesh-chat` instead of a placeholder such as `test-service`.
/// Nodes only see each other when they share the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceType(String);

impl ServiceType {
    pub const MAX_LEN: usize = 15;

    pub fn new<S: Into<String>>(value: S) -> Result<Self, MeshError> {
        let value = value.into();
        let invalid = |reason: &str| MeshError::InvalidServiceType {
            value: value.clone(),
            reason: reason.to_string(),
        };

        if value.is_empty() || value.len() > Self::MAX_LEN {
            return Err(invalid("must be 1-15 characters"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
        }
        if !value.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(invalid("must contain at least one letter"));
        }
        if value.starts_with('-') || value.ends_with('-') || value.contains("--") {
            return Err(invalid("hyphens may not lead, trail or repeat"));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self("mesh-chat".to_string())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceType {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceType {
    type Error = MeshError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceType> for String {
    fn from(service: ServiceType) -> Self {
        service.0
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Identifies one transport session; a reset always yields a new id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Source of wall-clock timestamps, injectable for tests
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// [`TimeSource`] backed by the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }
}
