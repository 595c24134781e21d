// Public modules
pub mod accumulating_stream;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod markdown;
pub mod observability;
pub mod rate_limit;
pub mod relay;
pub mod render;
pub mod server;
pub mod sse;
pub mod types;
pub mod upstream;

// Re-exports
pub use accumulating_stream::AccumulatingStream;
pub use client::{RelayClient, Transport};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use rate_limit::{CounterStore, FileCounterStore, MemoryCounterStore, RateGovernor};
pub use relay::{Relay, RelayReply};
pub use server::AppState;
pub use types::*;
pub use upstream::{OpenRouter, RequestOrigin, Upstream};
