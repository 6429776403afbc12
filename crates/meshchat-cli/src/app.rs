//! MeshChat CLI application
//!
//! Runs the local node and a handful of simulated peers on one in-process
//! [`LocalMesh`]. Simulated peers answer what the local user says so the chat
//! has someone to talk to.

use core::time::Duration;
use serde::Serialize;
use std::iter;
use tracing::{info, warn};

use meshchat_core::{ChatSnapshot, MeshConfig, PeerIdentity, SendOutcome};
use meshchat_harness::LocalMesh;
use meshchat_runtime::{RuntimeBuilder, RuntimeHandle};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// How long the whole mesh gets to form
const CONNECT_WAIT: Duration = Duration::from_secs(10);
/// How long a simulated peer waits to see a message before answering
const REPLY_WAIT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

pub struct MeshChatApp {
    local: RuntimeHandle,
    simulated: Vec<RuntimeHandle>,
}

impl MeshChatApp {
    /// Start the local node and `config.cli.simulated_peers` peers
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let mesh = LocalMesh::new();
        let local = Self::spawn_node(&mesh, &config.mesh, &config.cli.display_name).await?;

        let mut simulated = Vec::with_capacity(config.cli.simulated_peers);
        for index in 1..=config.cli.simulated_peers {
            let name = format!("peer-{index}");
            simulated.push(Self::spawn_node(&mesh, &config.mesh, &name).await?);
        }

        info!(
            local = %local.local(),
            simulated = simulated.len(),
            service = %config.mesh.service_type,
            "local mesh started"
        );
        Ok(Self { local, simulated })
    }

    async fn spawn_node(mesh: &LocalMesh, config: &MeshConfig, name: &str) -> Result<RuntimeHandle> {
        let handle = RuntimeBuilder::new(PeerIdentity::new(name))
            .with_config(config.clone())
            .build_and_start(mesh.transport())
            .await?;
        Ok(handle)
    }

    pub fn local(&self) -> &RuntimeHandle {
        &self.local
    }

    fn nodes(&self) -> impl Iterator<Item = &RuntimeHandle> {
        iter::once(&self.local).chain(self.simulated.iter())
    }

    /// Wait until every node is connected to every other node
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let expected = self.simulated.len();
        for node in self.nodes() {
            node.wait_for(timeout, |s| s.connected_peer_count() == expected)
                .await
                .map_err(|_| {
                    CliError::Timeout(format!("{} did not reach {expected} peers", node.local()))
                })?;
        }
        Ok(())
    }

    /// Let each simulated peer answer once it has seen `body` from the local node
    ///
    /// Returns how many peers answered. Peers that never see the message are
    /// skipped with a warning.
    pub async fn collect_replies(&self, body: &str) -> usize {
        let local_name = self.local.local().display_name().to_string();
        let mut replies = 0;

        for peer in &self.simulated {
            let seen = peer
                .wait_for(REPLY_WAIT, |s| last_from(s, &local_name) == Some(body))
                .await;
            if seen.is_err() {
                warn!(peer = %peer.local(), "peer never saw the message, not replying");
                continue;
            }
            match peer.send_text(format!("got \"{body}\"")).await {
                Ok(SendOutcome::Delivered { .. }) => replies += 1,
                Ok(outcome) => warn!(peer = %peer.local(), ?outcome, "reply not delivered"),
                Err(e) => warn!(peer = %peer.local(), error = %e, "reply failed"),
            }
        }
        replies
    }

    /// Send `messages` messages, gather one reply per peer and return the log
    pub async fn run_demo(&self, messages: usize) -> Result<Transcript> {
        self.wait_until_connected(CONNECT_WAIT).await?;

        let name = self.local.local().display_name().to_string();
        let mut delivered = 0;
        let mut last = None;
        for index in 1..=messages {
            let body = format!("message {index} from {name}");
            match self.local.send_text(body.clone()).await? {
                SendOutcome::Delivered { .. } => {
                    delivered += 1;
                    last = Some(body);
                }
                outcome => warn!(?outcome, "demo message not delivered"),
            }
        }

        let replies = match &last {
            Some(body) => self.collect_replies(body).await,
            None => 0,
        };

        let expected = delivered + replies;
        let snapshot = self
            .local
            .wait_for(REPLY_WAIT, |s| s.messages.len() >= expected)
            .await
            .map_err(|_| CliError::Timeout(format!("expected {expected} log entries")))?;
        Ok(Transcript::from_snapshot(&snapshot))
    }

    /// Stop every node, logging failures instead of aborting
    pub async fn shutdown(self) {
        for mut node in iter::once(self.local).chain(self.simulated) {
            if let Err(e) = node.shutdown().await {
                warn!(node = %node.local(), error = %e, "shutdown failed");
            }
        }
    }
}

/// Body of the most recent message in `snapshot` sent by `sender`
fn last_from<'a>(snapshot: &'a ChatSnapshot, sender: &str) -> Option<&'a str> {
    snapshot
        .messages
        .iter()
        .rev()
        .find(|entry| !entry.sender.is_local() && entry.sender.label() == sender)
        .map(|entry| entry.message.body.as_str())
}

// ----------------------------------------------------------------------------
// Transcript
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub sender: String,
    pub body: String,
    pub timestamp_ms: u64,
}

/// The local node's view of a finished chat
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub local: String,
    pub session: Option<u64>,
    pub peers: Vec<String>,
    pub messages: Vec<TranscriptLine>,
}

impl Transcript {
    pub fn from_snapshot(snapshot: &ChatSnapshot) -> Self {
        Self {
            local: snapshot.local.display_name().to_string(),
            session: snapshot.session.map(|id| id.as_u64()),
            peers: snapshot
                .connected_peers
                .iter()
                .map(|peer| peer.display_name().to_string())
                .collect(),
            messages: snapshot
                .messages
                .iter()
                .map(|entry| TranscriptLine {
                    sender: entry.sender.label().to_string(),
                    body: entry.message.body.clone(),
                    timestamp_ms: entry.timestamp.as_millis(),
                })
                .collect(),
        }
    }

    pub fn render_plain(&self) -> String {
        let mut out = format!("{} chatting with {}\n", self.local, self.peers.join(", "));
        for line in &self.messages {
            out.push_str(&format!("{}: {}\n", line.sender, line.body));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;

    fn config(peers: usize) -> AppConfig {
        AppConfig {
            mesh: MeshConfig::testing(),
            cli: CliConfig {
                display_name: "tester".to_string(),
                simulated_peers: peers,
            },
        }
    }

    #[tokio::test]
    async fn demo_collects_messages_and_replies() {
        let app = MeshChatApp::start(&config(2)).await.unwrap();

        let transcript = app.run_demo(2).await.unwrap();

        let own: Vec<_> = transcript
            .messages
            .iter()
            .filter(|line| line.sender == "self")
            .collect();
        assert_eq!(own.len(), 2);
        assert_eq!(transcript.messages.len(), 4);
        assert_eq!(transcript.peers.len(), 2);
        assert!(transcript.render_plain().contains("self: message 1 from tester"));

        app.shutdown().await;
    }

    #[tokio::test]
    async fn demo_without_peers_has_empty_transcript() {
        let app = MeshChatApp::start(&config(0)).await.unwrap();
        let transcript = app.run_demo(3).await.unwrap();
        assert!(transcript.messages.is_empty());
        app.shutdown().await;
    }
}
