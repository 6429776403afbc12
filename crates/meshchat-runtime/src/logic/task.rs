//! Core Loop Task
//!
//! The single task that owns the [`SessionController`]. It multiplexes UI
//! commands and transport events with `tokio::select!`, handles one at a time,
//! and republishes a [`ChatSnapshot`] on a watch channel whenever the
//! controller reports a state change.

use meshchat_core::{
    ChatSnapshot, Command, CommandReceiver, MeshError, MeshResult, SessionError, TransportError,
    TransportEventReceiver,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::controller::SessionController;

pub type SnapshotSender = watch::Sender<ChatSnapshot>;
pub type SnapshotReceiver = watch::Receiver<ChatSnapshot>;

// ----------------------------------------------------------------------------
// Core Loop Task
// ----------------------------------------------------------------------------

pub struct CoreLoopTask {
    controller: SessionController,
    command_receiver: CommandReceiver,
    event_receiver: TransportEventReceiver,
    snapshot_sender: SnapshotSender,
    /// Version of the last published snapshot
    version: u64,
    /// Controller revision the last snapshot was taken at
    published_revision: Option<u64>,
    running: bool,
}

impl CoreLoopTask {
    pub fn new(
        controller: SessionController,
        command_receiver: CommandReceiver,
        event_receiver: TransportEventReceiver,
        snapshot_sender: SnapshotSender,
    ) -> Self {
        Self {
            controller,
            command_receiver,
            event_receiver,
            snapshot_sender,
            version: 0,
            published_revision: None,
            running: true,
        }
    }

    /// Run until shutdown, the command channel closing, or an unrecoverable error
    pub async fn run(mut self) -> MeshResult<()> {
        info!(local = %self.controller.local(), "core loop starting");
        self.controller.start().await;
        self.publish_if_changed();

        let mut events_open = true;
        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(e) = self.process_command(command).await {
                                if !self.absorb(e, "command") {
                                    break;
                                }
                            }
                        }
                        None => {
                            info!("command channel closed, shutting down");
                            self.controller.shutdown().await;
                            self.running = false;
                        }
                    }
                }

                event = self.event_receiver.recv(), if events_open => {
                    match event {
                        Some(event) => {
                            debug!(kind = event.kind(), "transport event");
                            if let Err(e) = self.controller.handle_event(event).await {
                                if !self.absorb(e, "event") {
                                    break;
                                }
                            }
                        }
                        None => {
                            warn!("transport event channel closed");
                            events_open = false;
                        }
                    }
                }
            }

            self.publish_if_changed();
        }

        self.publish_if_changed();
        let stats = self.controller.stats();
        info!(
            events = stats.events_processed,
            stale = stats.stale_events_dropped,
            sent = stats.messages_sent,
            received = stats.messages_received,
            "core loop stopped"
        );
        Ok(())
    }

    async fn process_command(&mut self, command: Command) -> MeshResult<()> {
        match command {
            Command::SendText { body, reply } => {
                let outcome = self.controller.send_text(&body).await;
                debug!(?outcome, "send_text processed");
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
                Ok(())
            }
            Command::Reset { reply } => {
                let result = self.controller.reset().await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                        Ok(())
                    }
                    None => result.map(|_| ()),
                }
            }
            Command::Shutdown => {
                self.controller.shutdown().await;
                self.running = false;
                Ok(())
            }
        }
    }

    /// Log an error; returns false if the loop must stop
    fn absorb(&mut self, error: MeshError, source: &str) -> bool {
        match &error {
            MeshError::Session(SessionError::StaleSession { stale, current }) => {
                debug!(stale, current, "dropping {} for replaced session", source);
            }
            MeshError::Transport(TransportError::PeerNotFound { peer }) => {
                warn!(peer = %peer, "peer not found while processing {}", source);
            }
            e if !e.is_recoverable() => {
                error!(error = %e, "unrecoverable error processing {}, stopping core loop", source);
                self.running = false;
                return false;
            }
            e => error!(error = %e, "error processing {}", source),
        }
        true
    }

    fn publish_if_changed(&mut self) {
        let revision = self.controller.revision();
        if self.published_revision == Some(revision) {
            return;
        }
        self.version += 1;
        self.published_revision = Some(revision);
        self.snapshot_sender
            .send_replace(self.controller.snapshot(self.version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use meshchat_core::{
        create_command_channel, create_event_channel, ChannelConfig, CommandSender,
        ConnectionState, MeshConfig, MeshTransport, PeerIdentity, SendOutcome, SystemTimeSource,
        TransportEvent,
    };
    use meshchat_harness::{RecordingHandle, RecordingTransport};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    struct Running {
        commands: CommandSender,
        snapshots: SnapshotReceiver,
        transport: RecordingHandle,
        task: tokio::task::JoinHandle<MeshResult<()>>,
    }

    async fn spawn_loop() -> Running {
        let config = ChannelConfig::testing();
        let (mut transport, handle) = RecordingTransport::new();
        let (event_sender, event_receiver) = create_event_channel(&config);
        transport.attach_events(event_sender);
        let (commands, command_receiver) = create_command_channel(&config);

        let local = PeerIdentity::new("me");
        let controller = SessionController::new(
            local.clone(),
            MeshConfig::testing(),
            Arc::new(transport),
            Arc::new(SystemTimeSource),
        )
        .await
        .unwrap();
        let (snapshot_sender, snapshots) = watch::channel(ChatSnapshot::initial(local));
        let task = CoreLoopTask::new(controller, command_receiver, event_receiver, snapshot_sender);

        Running {
            commands,
            snapshots,
            transport: handle,
            task: tokio::spawn(task.run()),
        }
    }

    async fn wait_for<F>(snapshots: &mut SnapshotReceiver, predicate: F) -> ChatSnapshot
    where
        F: FnMut(&ChatSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), snapshots.wait_for(predicate))
            .await
            .expect("snapshot within timeout")
            .expect("loop alive")
            .clone()
    }

    #[tokio::test]
    async fn publishes_connected_peers_and_messages() {
        let mut running = spawn_loop().await;
        let session = wait_for(&mut running.snapshots, |s| s.session.is_some())
            .await
            .session
            .unwrap();
        let bob = PeerIdentity::new("bob");

        running
            .transport
            .emit(TransportEvent::ConnectionStateChanged {
                session,
                peer: bob.clone(),
                state: ConnectionState::Connected,
            })
            .await
            .unwrap();
        running
            .transport
            .emit(TransportEvent::DataReceived {
                session,
                from: bob.clone(),
                payload: b"hi there".to_vec(),
            })
            .await
            .unwrap();

        let snapshot = wait_for(&mut running.snapshots, |s| !s.messages.is_empty()).await;
        assert_eq!(snapshot.connected_peers, vec![bob]);
        assert_eq!(snapshot.messages[0].to_string(), "bob: hi there");

        running.commands.send(Command::Shutdown).await.unwrap();
        running.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_command_replies_with_outcome() {
        let running = spawn_loop().await;
        let (reply, outcome) = oneshot::channel();

        running
            .commands
            .send(Command::SendText {
                body: "anyone?".to_string(),
                reply: Some(reply),
            })
            .await
            .unwrap();

        assert_eq!(outcome.await.unwrap(), SendOutcome::NoPeers);
        assert!(running.transport.sends().is_empty());
    }

    #[tokio::test]
    async fn versions_increase_with_each_publication() {
        let mut running = spawn_loop().await;
        let first = wait_for(&mut running.snapshots, |s| s.version >= 1).await;

        let (reply, reset) = oneshot::channel();
        running
            .commands
            .send(Command::Reset { reply: Some(reply) })
            .await
            .unwrap();
        let fresh = reset.await.unwrap().unwrap();

        let second = wait_for(&mut running.snapshots, |s| s.session == Some(fresh)).await;
        assert!(second.version > first.version);
    }

    #[tokio::test]
    async fn dropping_every_command_sender_stops_the_loop() {
        let running = spawn_loop().await;
        drop(running.commands);
        let result = tokio::time::timeout(Duration::from_secs(2), running.task)
            .await
            .expect("loop stops");
        assert!(result.unwrap().is_ok());
    }
}
