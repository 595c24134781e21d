// Public modules
pub mod chat_settings;
pub mod completion_response;
pub mod conversation_history;
pub mod message;
pub mod relay_request;
pub mod secret_key;
pub mod upstream_payload;

// Re-exports
pub use chat_settings::ChatSettings;
pub use completion_response::{
    ChunkChoice, ChunkDelta, CompletionChoice, CompletionChunk, CompletionMessage,
    CompletionResponse,
};
pub use conversation_history::ConversationHistory;
pub use message::{Message, Role};
pub use relay_request::RelayRequest;
pub use secret_key::SecretKey;
pub use upstream_payload::{TOP_P, UpstreamPayload};
