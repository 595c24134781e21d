//! Slash command parsing for the chat client.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the session without sending messages to the
//! relay.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Clear the conversation history.
    Clear,

    /// Set the system prompt.
    /// `None` shows the current one.
    System(Option<String>),

    /// Print the conversation history.
    History,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a regular message.
///
/// # Examples
///
/// ```
/// # use chat_relay::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/system Answer briefly.").is_some());
/// assert!(parse_command("Tell me about your services").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" | "reset" => ChatCommand::Clear,
        "system" => ChatCommand::System(argument.map(str::to_string)),
        "history" => ChatCommand::History,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "" => ChatCommand::Invalid("empty command; try /help".to_string()),
        other => ChatCommand::Invalid(format!("unknown command /{other}; try /help")),
    };
    Some(result)
}

/// Returns the help text describing the available commands.
pub fn help_text() -> &'static str {
    "\
Commands:
  /help             Show this help
  /clear            Clear the conversation history
  /system [prompt]  Show or set the system prompt
  /history          Print the conversation so far
  /quit             Exit"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /QUIT  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_clear() {
        assert_eq!(parse_command("/clear"), Some(ChatCommand::Clear));
        assert_eq!(parse_command("/reset"), Some(ChatCommand::Clear));
    }

    #[test]
    fn parse_system() {
        assert_eq!(
            parse_command("/system You sell contracting services."),
            Some(ChatCommand::System(Some(
                "You sell contracting services.".to_string()
            )))
        );
        assert_eq!(parse_command("/system"), Some(ChatCommand::System(None)));
        assert_eq!(parse_command("/system   "), Some(ChatCommand::System(None)));
    }

    #[test]
    fn parse_history_and_help() {
        assert_eq!(parse_command("/history"), Some(ChatCommand::History));
        assert_eq!(parse_command("/help"), Some(ChatCommand::Help));
        assert_eq!(parse_command("/?"), Some(ChatCommand::Help));
    }

    #[test]
    fn unknown_commands_are_invalid() {
        assert!(matches!(
            parse_command("/model gpt"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("/model")
        ));
        assert!(matches!(parse_command("/"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn non_commands() {
        assert!(parse_command("Hello").is_none());
        assert!(parse_command("what is 1/2?").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn help_text_lists_commands() {
        let help = help_text();
        for cmd in ["/help", "/clear", "/system", "/history", "/quit"] {
            assert!(help.contains(cmd), "{cmd} missing");
        }
    }
}
