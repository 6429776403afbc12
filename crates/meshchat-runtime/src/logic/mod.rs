//! Core Logic Module
//!
//! - `controller`: session lifecycle, invitation policy and the peer registry
//! - `exchange`: text encoding, decoding and the message log
//! - `task`: the serialized loop that owns the controller
//!
//! All mutable chat state lives in one [`SessionController`] owned by one
//! [`CoreLoopTask`]. Transport events and UI commands reach it only through
//! channels, so handlers never race each other.

pub mod controller;
pub mod exchange;
pub mod task;

pub use controller::{ControllerStats, SessionController};
pub use exchange::MessageExchange;
pub use task::{CoreLoopTask, SnapshotReceiver, SnapshotSender};
