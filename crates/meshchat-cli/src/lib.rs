//! MeshChat CLI library
//!
//! Application wiring, configuration and command handlers for the `meshchat`
//! binary, which runs a local node and simulated peers on an in-process mesh.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::{MeshChatApp, Transcript, TranscriptLine};
pub use cli::{Cli, Commands};
pub use commands::{ChatInput, CommandDispatcher};
pub use config::{AppConfig, CliConfig};
pub use error::{CliError, Result};
