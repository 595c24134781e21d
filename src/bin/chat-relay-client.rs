//! Interactive chat client for a chat relay.
//!
//! This binary provides a REPL that talks to a running `chat-relay`, never
//! to the upstream API directly.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a relay on the default address
//! chat-relay-client
//!
//! # Point at another relay and override its system prompt
//! chat-relay-client --relay https://example.com --system "Answer briefly."
//!
//! # Buffered replies without colors, printing the rendered HTML
//! chat-relay-client --no-stream --no-color --html
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Clear conversation history
//! - `/system [prompt]` - Show or set the system prompt
//! - `/history` - Print the conversation so far
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use chat_relay::chat::{
    ChatCommand, ChatSession, ClientArgs, ClientConfig, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use chat_relay::{ConversationHistory, RelayClient, Role};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ClientArgs::from_command_line_relaxed("chat-relay-client [OPTIONS]");
    let mut config = ClientConfig::from(args);

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let mut renderer = PlainTextRenderer::with_color(config.use_color)
        .with_markup(config.show_markup)
        .with_interrupt(interrupted.clone());

    let client = RelayClient::new(&config.relay_url)?;
    match client.fetch_settings().await {
        Ok(settings) => {
            config.apply_settings(&settings);
            println!("Chat (relay: {}, model: {})", client.base_url(), settings.model);
        }
        Err(err) => {
            renderer.print_error(&format!("Could not load relay settings: {err}"));
            println!("Chat (relay: {})", client.base_url());
        }
    }
    println!("Type /help for commands, /quit to exit\n");

    let mut session = ChatSession::new(client).with_streaming(config.stream());
    if let Some(prompt) = config.system_prompt.clone() {
        session.set_system_prompt(prompt);
    }
    let mut rl = DefaultEditor::new()?;

    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            session.clear_history();
                            renderer.print_info("Conversation cleared.");
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::System(Some(prompt)) => {
                            session.set_system_prompt(prompt.clone());
                            renderer.print_info(&format!("System prompt set to: {}", prompt));
                        }
                        ChatCommand::System(None) => match session.system_prompt() {
                            Some(prompt) => {
                                renderer.print_info(&format!("System prompt: {}", prompt))
                            }
                            None => renderer.print_info("System prompt: (none)"),
                        },
                        ChatCommand::History => print_history(session.history()),
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                // The session reports failures through the renderer.
                println!("Assistant:");
                let _ = session.send(line, &mut renderer).await;
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn print_history(history: &ConversationHistory) {
    if history.is_empty() {
        println!("    (no messages)");
        return;
    }
    for message in history.messages() {
        let who = match message.role {
            Role::System => "system",
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("    [{who}] {}", message.content);
    }
}
