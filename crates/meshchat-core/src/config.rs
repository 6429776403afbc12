//! Configuration for the MeshChat core
//!
//! All structures are serde-friendly so an application can load them from a
//! file and override individual fields.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{MeshError, MeshResult};
use crate::types::ServiceType;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the channels feeding the core loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (UI → core loop)
    pub command_buffer_size: usize,
    /// Buffer size for transport event channels (transport → core loop)
    pub event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32, // UI commands are infrequent
            event_buffer_size: 128,  // Network events can be bursty
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Mesh Configuration
// ----------------------------------------------------------------------------

/// Top-level configuration for a MeshChat node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Service identifier advertised and browsed for
    pub service_type: ServiceType,
    /// How long the transport waits for a peer to answer an invitation
    pub invitation_timeout_secs: u64,
    /// Largest text body accepted by `send_text`, in bytes
    pub max_message_bytes: usize,
    /// Channel buffer sizes
    pub channels: ChannelConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            invitation_timeout_secs: 10,
            max_message_bytes: 64 * 1024,
            channels: ChannelConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Configuration for tests: roomy channels, short invitation timeout
    pub fn testing() -> Self {
        Self {
            invitation_timeout_secs: 2,
            channels: ChannelConfig::testing(),
            ..Self::default()
        }
    }

    pub fn invitation_timeout(&self) -> Duration {
        Duration::from_secs(self.invitation_timeout_secs)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> MeshResult<()> {
        if self.invitation_timeout_secs == 0 {
            return Err(MeshError::config_error("invitation_timeout_secs must be non-zero"));
        }
        if self.max_message_bytes == 0 {
            return Err(MeshError::config_error("max_message_bytes must be non-zero"));
        }
        if self.channels.command_buffer_size == 0 || self.channels.event_buffer_size == 0 {
            return Err(MeshError::config_error("channel buffer sizes must be non-zero"));
        }
        Ok(())
    }
}
