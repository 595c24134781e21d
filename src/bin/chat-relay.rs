//! Chat relay server.
//!
//! Serves the chat and config endpoints, holding the upstream secret key so
//! browsers and other clients never see it.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default address with a file-backed governor
//! OPENROUTER_API_KEY=sk-... chat-relay
//!
//! # Bind elsewhere and keep rate counters in memory
//! chat-relay --bind 0.0.0.0:3000 --memory-rate-limit
//!
//! # Also rate limit the chat endpoint, 20 requests per 10 minutes
//! chat-relay --limit-chat --rate-limit 20 --rate-window 600
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrrg::CommandLine;
use arrrg_derive::CommandLine;
use tracing_subscriber::EnvFilter;

use chat_relay::config::DEFAULT_TIMEOUT;
use chat_relay::rate_limit::{DEFAULT_CAPACITY, DEFAULT_WINDOW};
use chat_relay::{
    AppState, CounterStore, FileCounterStore, MemoryCounterStore, OpenRouter, RateGovernor,
    RelayConfig, server,
};

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const RATE_DIR_NAME: &str = "chat-relay-rate-limits";

/// Command-line arguments for the chat-relay server.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
struct RelayArgs {
    #[arrrg(optional, "Address to listen on (default: 127.0.0.1:8080)", "ADDR")]
    bind: Option<String>,

    #[arrrg(optional, "Requests allowed per window (default: 100)", "COUNT")]
    rate_limit: Option<u64>,

    #[arrrg(optional, "Rate limit window in seconds (default: 3600)", "SECONDS")]
    rate_window: Option<u64>,

    #[arrrg(optional, "Directory for rate limit records (default: system temp dir)", "DIR")]
    rate_dir: Option<String>,

    #[arrrg(flag, "Keep rate limit counters in memory")]
    memory_rate_limit: bool,

    #[arrrg(flag, "Also rate limit the chat endpoint")]
    limit_chat: bool,

    #[arrrg(optional, "Upstream timeout in seconds (default: 60)", "SECONDS")]
    timeout: Option<u64>,
}

fn counter_store(args: &RelayArgs) -> chat_relay::Result<Arc<dyn CounterStore>> {
    if args.memory_rate_limit && args.rate_dir.is_none() {
        return Ok(Arc::new(MemoryCounterStore::new()));
    }
    let dir = args
        .rate_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join(RATE_DIR_NAME));
    let store = FileCounterStore::new(dir)?;
    tracing::info!(dir = %store.dir().display(), "using file-backed rate limit store");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (args, free) = RelayArgs::from_command_line_relaxed("chat-relay [OPTIONS]");
    if !free.is_empty() {
        eprintln!("chat-relay takes no positional arguments");
        std::process::exit(1);
    }

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);
    let config = Arc::new(RelayConfig::from_env()?.with_timeout(timeout));
    if !config.is_configured() {
        tracing::warn!("OPENROUTER_API_KEY is not set; chat requests will answer 503");
    }

    let upstream = Arc::new(OpenRouter::new(&config)?);
    let window = args
        .rate_window
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_WINDOW);
    let governor = Arc::new(RateGovernor::new(
        counter_store(&args)?,
        args.rate_limit.unwrap_or(DEFAULT_CAPACITY),
        window,
    ));
    tracing::info!(
        capacity = governor.capacity(),
        window_secs = governor.window().as_secs(),
        limit_chat = args.limit_chat,
        "rate governor ready"
    );
    let state = AppState::new(config, upstream, governor).with_chat_limit(args.limit_chat);

    let bind: SocketAddr = args.bind.as_deref().unwrap_or(DEFAULT_BIND).parse()?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;
    Ok(())
}
