//! Interactive conversations through a chat relay.
//!
//! This module provides the conversation side of the relay: a session that
//! owns the message history and talks to the relay through a [`Transport`],
//! plus what the REPL binary needs around it.
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Conversation state and the send operations
//! - [`commands`]: Slash command parsing
//!
//! [`Transport`]: crate::client::Transport

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ClientArgs, ClientConfig};
pub use session::{ChatSession, user_message};
