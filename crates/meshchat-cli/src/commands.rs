//! Command handlers for the MeshChat CLI

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use meshchat_core::SendOutcome;

use crate::app::{MeshChatApp, Transcript};
use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::Result;

/// One line typed in interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Empty,
    Text(String),
    Peers,
    Log,
    Reset,
    Quit,
    Unknown(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ChatInput::Empty;
        }
        if !line.starts_with('/') {
            return ChatInput::Text(line.to_string());
        }
        match line {
            "/peers" => ChatInput::Peers,
            "/log" => ChatInput::Log,
            "/reset" => ChatInput::Reset,
            "/quit" | "/exit" => ChatInput::Quit,
            other => ChatInput::Unknown(other.to_string()),
        }
    }
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Chat { name, peers } => {
                let config = config.with_overrides(name, peers);
                config.validate()?;
                Self::handle_chat_command(config).await
            }
            Commands::Demo {
                peers,
                messages,
                json,
            } => {
                let config = config.with_overrides(None, peers);
                config.validate()?;
                Self::handle_demo_command(config, messages, json).await
            }
        }
    }

    async fn handle_chat_command(config: AppConfig) -> Result<()> {
        info!(
            "Starting interactive chat as {} with {} simulated peers",
            config.cli.display_name, config.cli.simulated_peers
        );
        let app = MeshChatApp::start(&config).await?;

        println!("MeshChat as {}. Commands: /peers /log /reset /quit", config.cli.display_name);
        let result = Self::chat_loop(&app).await;

        app.shutdown().await;
        result
    }

    async fn chat_loop(app: &MeshChatApp) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut updates = app.local().subscribe();
        let mut printed = updates.borrow().messages.len();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match ChatInput::parse(&line) {
                        ChatInput::Empty => {}
                        ChatInput::Quit => break,
                        ChatInput::Peers => Self::print_peers(app),
                        ChatInput::Log => Self::print_log(app),
                        ChatInput::Reset => {
                            let session = app.local().reset().await?;
                            println!("* session reset, now on {session}");
                        }
                        ChatInput::Text(text) => Self::send_line(app, &text).await?,
                        ChatInput::Unknown(command) => {
                            println!("* unknown command {command}; try /peers /log /reset /quit");
                        }
                    }
                }

                changed = updates.changed() => {
                    if changed.is_err() {
                        warn!("local runtime stopped");
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    for entry in snapshot.messages.iter().skip(printed) {
                        if !entry.sender.is_local() {
                            println!("{entry}");
                        }
                    }
                    printed = snapshot.messages.len();
                }
            }
        }
        Ok(())
    }

    async fn send_line(app: &MeshChatApp, text: &str) -> Result<()> {
        match app.local().send_text(text).await? {
            SendOutcome::Delivered { recipients } => {
                println!("* sent to {recipients} peer(s)");
                app.collect_replies(text).await;
            }
            SendOutcome::NoPeers => println!("* no peers connected yet"),
            SendOutcome::Failed => println!("* message could not be sent"),
        }
        Ok(())
    }

    fn print_peers(app: &MeshChatApp) {
        let snapshot = app.local().snapshot();
        if snapshot.connected_peers.is_empty() {
            println!("* no connected peers");
            return;
        }
        println!("* {} connected peer(s):", snapshot.connected_peer_count());
        for peer in &snapshot.connected_peers {
            println!("  {peer}");
        }
    }

    fn print_log(app: &MeshChatApp) {
        let snapshot = app.local().snapshot();
        for entry in snapshot.messages.iter() {
            println!("{entry}");
        }
    }

    async fn handle_demo_command(config: AppConfig, messages: usize, json: bool) -> Result<()> {
        info!(
            "Running demo with {} simulated peers and {} messages",
            config.cli.simulated_peers, messages
        );
        let app = MeshChatApp::start(&config).await?;
        let result = app.run_demo(messages).await;
        app.shutdown().await;

        let transcript = result?;
        Self::print_transcript(&transcript, json)
    }

    fn print_transcript(transcript: &Transcript, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(transcript)?);
        } else {
            print!("{}", transcript.render_plain());
        }
        Ok(())
    }
}
