//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat interactively with simulated peers on a local mesh
    Chat {
        /// Your display name
        #[arg(short, long)]
        name: Option<String>,
        /// Number of simulated peers to start alongside you
        #[arg(short, long)]
        peers: Option<usize>,
    },
    /// Run a scripted exchange and print the transcript
    Demo {
        /// Number of simulated peers
        #[arg(short, long)]
        peers: Option<usize>,
        /// Messages to send from the local node
        #[arg(short, long, default_value_t = 3)]
        messages: usize,
        /// Print the transcript as JSON
        #[arg(long)]
        json: bool,
    },
}
