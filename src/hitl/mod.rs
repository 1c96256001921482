//! Human-in-the-loop messaging
//!
//! Inbound SMS handling (URL ingestion, commands, approval answers) and the
//! intent grammar. Outbound traffic always flows through the
//! `send_notification` queue.

mod controller;
mod intents;

pub use controller::HitlController;
pub use intents::{Command, Intent, parse_intent};
