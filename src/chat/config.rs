//! Configuration types for the chat client.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! client configuration. Values not given on the command line are filled in
//! from the relay's config endpoint.

use arrrg_derive::CommandLine;

use crate::client::DEFAULT_RELAY_URL;
use crate::types::ChatSettings;

/// Command-line arguments for the chat-relay-client tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ClientArgs {
    /// Base URL of the relay.
    #[arrrg(optional, "Relay base URL (default: http://127.0.0.1:8080)", "URL")]
    pub relay: Option<String>,

    /// System prompt override.
    #[arrrg(optional, "System prompt for the conversation", "PROMPT")]
    pub system: Option<String>,

    /// Request buffered replies instead of streams.
    #[arrrg(flag, "Request buffered replies")]
    pub no_stream: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Print rendered markup after each reply.
    #[arrrg(flag, "Print the rendered HTML after each reply")]
    pub html: bool,
}

/// Resolved configuration for the chat client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the relay.
    pub relay_url: String,

    /// System prompt; `None` until given or fetched from the relay.
    pub system_prompt: Option<String>,

    /// Streaming preference; `None` until given or fetched from the relay.
    pub stream: Option<bool>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to print rendered markup after each reply.
    pub show_markup: bool,
}

impl ClientConfig {
    /// Creates a ClientConfig with default values.
    pub fn new() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            system_prompt: None,
            stream: None,
            use_color: true,
            show_markup: false,
        }
    }

    /// Fills unset values from the relay's settings.
    pub fn apply_settings(&mut self, settings: &ChatSettings) {
        if self.system_prompt.is_none() {
            self.system_prompt = Some(settings.system_prompt.clone());
        }
        if self.stream.is_none() {
            self.stream = Some(settings.use_streaming);
        }
    }

    /// The streaming preference, defaulting to streamed replies.
    pub fn stream(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        ClientConfig {
            relay_url: args
                .relay
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            system_prompt: args.system,
            stream: if args.no_stream { Some(false) } else { None },
            use_color: !args.no_color,
            show_markup: args.html,
        }
    }
}
