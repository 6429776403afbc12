//! MeshChat CLI configuration
//!
//! An optional TOML file with a `[mesh]` table for the core configuration and
//! a `[cli]` table for this binary. Missing keys fall back to defaults and
//! command-line flags override whatever the file says.

use serde::{Deserialize, Serialize};
use std::path::Path;

use meshchat_core::MeshConfig;

use crate::error::{CliError, Result};

/// Settings that only matter to the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Display name for the local node
    pub display_name: String,
    /// Simulated peers started next to the local node
    pub simulated_peers: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            display_name: "Anonymous".to_string(),
            simulated_peers: 2,
        }
    }
}

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mesh: MeshConfig,
    pub cli: CliConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, name: Option<String>, peers: Option<usize>) -> Self {
        if let Some(name) = name {
            self.cli.display_name = name;
        }
        if let Some(peers) = peers {
            self.cli.simulated_peers = peers;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.mesh.validate()?;
        if self.cli.display_name.trim().is_empty() {
            return Err(CliError::Config("display_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Annotated example configuration file
    pub fn example_config() -> String {
        r#"# MeshChat configuration

[mesh]
# Shared by every node that should find each other
service_type = "mesh-chat"
invitation_timeout_secs = 10
max_message_bytes = 65536

[mesh.channels]
command_buffer_size = 32
event_buffer_size = 128

[cli]
display_name = "Anonymous"
simulated_peers = 2
"#
        .to_string()
    }
}
