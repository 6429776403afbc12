//! Runtime Builder API
//!
//! Consumers (the CLI, tests) hand the builder a transport and get back a
//! [`RuntimeHandle`] for sending commands and observing chat state.

use core::time::Duration;
use meshchat_core::{
    create_command_channel, create_event_channel, ChatSnapshot, Command, CommandSender,
    MeshConfig, MeshError, MeshResult, MeshTransport, PeerIdentity, SendOutcome, SessionId,
    SystemTimeSource, TimeSource,
};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::logic::{CoreLoopTask, SessionController, SnapshotReceiver};

/// Upper bound on waiting for the core loop to finish during shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a MeshChat runtime bound to one local identity
pub struct RuntimeBuilder {
    local: PeerIdentity,
    config: MeshConfig,
    time_source: Arc<dyn TimeSource>,
}

impl RuntimeBuilder {
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            config: MeshConfig::default(),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    pub fn with_config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock used to timestamp log entries
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Wire `transport` to a fresh core loop and start advertising and browsing
    pub async fn build_and_start<T>(self, mut transport: T) -> MeshResult<RuntimeHandle>
    where
        T: MeshTransport + 'static,
    {
        self.config.validate()?;
        info!(local = %self.local, service = %self.config.service_type, "building MeshChat runtime");

        let (command_sender, command_receiver) = create_command_channel(&self.config.channels);
        let (event_sender, event_receiver) = create_event_channel(&self.config.channels);
        transport.attach_events(event_sender);

        let controller = SessionController::new(
            self.local.clone(),
            self.config,
            Arc::new(transport),
            self.time_source,
        )
        .await?;

        let (snapshot_sender, snapshots) = watch::channel(ChatSnapshot::initial(self.local.clone()));
        let task = CoreLoopTask::new(controller, command_receiver, event_receiver, snapshot_sender);
        let task_handle = tokio::spawn(task.run());

        info!(local = %self.local, "MeshChat runtime started");

        Ok(RuntimeHandle {
            local: self.local,
            command_sender,
            snapshots,
            task_handle: Some(task_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running MeshChat runtime
pub struct RuntimeHandle {
    local: PeerIdentity,
    command_sender: CommandSender,
    snapshots: SnapshotReceiver,
    task_handle: Option<JoinHandle<MeshResult<()>>>,
}

impl RuntimeHandle {
    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    /// Latest published state
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch receiver that observes every future publication
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }

    pub fn connected_peer_count(&self) -> usize {
        self.snapshots.borrow().connected_peer_count()
    }

    /// Broadcast `body` to every connected peer
    ///
    /// Only a stopped runtime is an error; delivery problems are reported
    /// through the returned [`SendOutcome`].
    pub async fn send_text<B: Into<String>>(&self, body: B) -> MeshResult<SendOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.send_command(Command::SendText {
            body: body.into(),
            reply: Some(reply),
        })
        .await?;
        outcome
            .await
            .map_err(|_| MeshError::channel_error("core loop dropped send reply"))
    }

    /// Replace the session; resolves to the new session id
    pub async fn reset(&self) -> MeshResult<SessionId> {
        let (reply, result) = oneshot::channel();
        self.send_command(Command::Reset { reply: Some(reply) }).await?;
        result
            .await
            .map_err(|_| MeshError::channel_error("core loop dropped reset reply"))?
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> MeshResult<ChatSnapshot>
    where
        F: FnMut(&ChatSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = tokio::time::timeout(timeout, snapshots.wait_for(predicate))
            .await
            .map_err(|_| MeshError::channel_error("timed out waiting for chat state"))?
            .map_err(|_| MeshError::channel_error("core loop stopped"))?;
        Ok(snapshot.clone())
    }

    async fn send_command(&self, command: Command) -> MeshResult<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| MeshError::channel_error("Failed to send command to runtime"))
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop discovery, disconnect and wait for the core loop to exit
    pub async fn shutdown(&mut self) -> MeshResult<()> {
        info!(local = %self.local, "shutting down MeshChat runtime");
        let _ = self.send_command(Command::Shutdown).await;

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => {
                    return Err(MeshError::channel_error(format!("core loop panicked: {e}")))
                }
                Err(_) => return Err(MeshError::channel_error("core loop did not stop in time")),
            }
        }
        info!(local = %self.local, "MeshChat runtime shut down");
        Ok(())
    }
}
